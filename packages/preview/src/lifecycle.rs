// ABOUTME: Lifecycle control for preview runs owned by one consuming view
// ABOUTME: Decides when a run may start, restarts it on new input and tears it down on disposal

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::capability::{CapabilityResult, SandboxCapability};
use crate::config::PreviewConfig;
use crate::orchestrator::Provisioner;
use crate::sink::{status_channel, StatusReceiver};
use crate::tree::VirtualFileTree;
use crate::types::{Failure, PreviewError, PreviewResult, ProvisioningState};

/// Accept origins served over HTTPS, or from localhost.
pub fn check_secure_context(origin: &str) -> PreviewResult<()> {
    let unsupported = || PreviewError::EnvironmentUnsupported {
        origin: origin.to_string(),
    };

    let uri: http::Uri = origin.parse().map_err(|_| unsupported())?;
    let secure = uri.scheme_str() == Some("https") || uri.host() == Some("localhost");
    if secure {
        Ok(())
    } else {
        Err(unsupported())
    }
}

struct ActiveRun {
    id: Uuid,
    task: JoinHandle<ProvisioningState>,
}

/// Owns at most one provisioning run on behalf of a consuming view.
///
/// A run starts once both a booted sandbox and a non-empty file set are
/// present. New files or [`restart`](Self::restart) replace the active run;
/// [`dispose`](Self::dispose) (or dropping the session) ends it and sends the
/// sandbox one best-effort termination request.
///
/// Must be used from within a tokio runtime.
pub struct PreviewSession {
    config: PreviewConfig,
    capability: Option<Arc<dyn SandboxCapability>>,
    files: VirtualFileTree,
    active: Option<ActiveRun>,
    disposed: bool,
}

impl PreviewSession {
    pub fn new(config: PreviewConfig) -> Self {
        Self {
            config,
            capability: None,
            files: VirtualFileTree::new(),
            active: None,
            disposed: false,
        }
    }

    /// Hand over the result of booting the sandbox.
    ///
    /// A boot failure is reported once as a terminal status and no run is
    /// started.
    pub fn attach_capability(
        &mut self,
        booted: CapabilityResult<Arc<dyn SandboxCapability>>,
    ) -> Option<StatusReceiver> {
        match booted {
            Ok(capability) => {
                info!("Sandbox capability attached");
                self.capability = Some(capability);
                self.start()
            }
            Err(e) => {
                error!("Sandbox boot error: {}", e);
                let (sink, receiver) = status_channel();
                let error = PreviewError::from(e);
                sink.transition(ProvisioningState::Failed {
                    failure: Failure::from(&error),
                    log: String::new(),
                });
                Some(receiver)
            }
        }
    }

    /// Replace the project files. Starts a fresh run when the preconditions hold.
    pub fn set_files(&mut self, files: VirtualFileTree) -> Option<StatusReceiver> {
        self.files = files;
        self.start()
    }

    /// Discard the current run and begin again from an empty status log
    pub fn restart(&mut self) -> Option<StatusReceiver> {
        self.start()
    }

    /// Whether a run is still being driven (including a ready server whose
    /// output is still being followed)
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .map(|run| !run.task.is_finished())
            .unwrap_or(false)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// End the active run and ask the sandbox to stop its processes.
    /// Safe to call more than once; only the first call has any effect.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.teardown_active();
        info!("Preview session disposed");
    }

    fn start(&mut self) -> Option<StatusReceiver> {
        if self.disposed {
            warn!("Ignoring start request on a disposed preview session");
            return None;
        }
        let capability = self.capability.clone()?;
        if self.files.is_empty() {
            return None;
        }

        // At most one run per session
        let previous_teardown = self.teardown_active();

        let (sink, receiver) = status_channel();

        if let Some(origin) = &self.config.page_origin {
            if let Err(error) = check_secure_context(origin) {
                error!("{}", error);
                sink.transition(ProvisioningState::Failed {
                    failure: Failure::from(&error),
                    log: String::new(),
                });
                return Some(receiver);
            }
        }

        let id = Uuid::new_v4();
        info!(
            "Starting preview run {} for {} project files",
            id,
            self.files.len()
        );
        let provisioner = Provisioner::new(capability, self.config.clone(), sink);
        let task = tokio::spawn(async move {
            // The previous run's processes must be gone before new ones start
            if let Some(teardown) = previous_teardown {
                let _ = teardown.await;
            }
            provisioner.run().await
        });
        self.active = Some(ActiveRun { id, task });

        Some(receiver)
    }

    fn teardown_active(&mut self) -> Option<JoinHandle<()>> {
        let run = self.active.take()?;
        info!("Tearing down preview run {}", run.id);
        run.task.abort();

        let capability = self.capability.clone()?;
        request_termination(capability)
    }
}

impl Drop for PreviewSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Fire-and-forget: the outcome is logged, never reported. Only a
/// follow-up run waits on the returned handle.
fn request_termination(capability: Arc<dyn SandboxCapability>) -> Option<JoinHandle<()>> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(async move {
            if let Err(e) = capability.terminate().await {
                warn!("Sandbox termination request failed: {}", e);
            }
        })),
        Err(_) => {
            warn!("No async runtime available; skipping sandbox termination");
            None
        }
    }
}
