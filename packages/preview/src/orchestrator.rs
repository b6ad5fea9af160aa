// ABOUTME: Sandbox provisioning protocol: mount, install, start server, await ready
// ABOUTME: Enforces phase timeouts, streams process output into the status log, maps failures to terminal states

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::capability::{OutputStream, ProcessHandle, ReadyListener, SandboxCapability};
use crate::config::PreviewConfig;
use crate::guard::TimeoutGuard;
use crate::log::{LogAggregator, StatusLog};
use crate::manifest::{dev_server_config_tree, manifest_tree};
use crate::sink::StatusSink;
use crate::types::{
    Failure, PhaseResult, PreviewError, PreviewResult, ProvisioningState, ServerReady,
};

pub const INSTALL_COMMAND: (&str, &[&str]) = ("npm", &["install"]);
pub const DEV_SERVER_COMMAND: (&str, &[&str]) = ("npm", &["run", "dev"]);

const STATUS_SETTING_UP: &str = "Setting up environment...";
const STATUS_WRITING_MANIFEST: &str = "Creating package.json...";
const STATUS_WRITING_CONFIG: &str = "Creating vite config...";
const STATUS_INSTALLING: &str = "Installing dependencies...\nThis might take a few minutes...";
const STATUS_STARTING_SERVER: &str = "Starting development server...";
const STATUS_READY: &str = "Server ready!";

/// The dev-server process after it has been spawned
struct DevServer {
    output: OutputStream,
    aggregator: LogAggregator,
}

/// Drives one provisioning run against a booted sandbox.
///
/// A run owns its status log and state outright; nothing else writes them.
/// Every failure is converted into a terminal [`ProvisioningState::Failed`]
/// at the boundary of [`run`](Self::run) and never escapes it.
pub struct Provisioner {
    capability: Arc<dyn SandboxCapability>,
    config: PreviewConfig,
    sink: StatusSink,
    log: StatusLog,
    state: ProvisioningState,
}

impl Provisioner {
    pub fn new(
        capability: Arc<dyn SandboxCapability>,
        config: PreviewConfig,
        sink: StatusSink,
    ) -> Self {
        Self {
            capability,
            config,
            sink,
            log: StatusLog::new(),
            state: ProvisioningState::Idle,
        }
    }

    pub fn state(&self) -> &ProvisioningState {
        &self.state
    }

    pub fn status_log(&self) -> &str {
        self.log.contents()
    }

    /// Run the protocol to a terminal state, then keep following the dev
    /// server's output until the server closes it.
    ///
    /// Returns the terminal state; for a healthy server this future stays
    /// pending as long as the server runs.
    pub async fn run(mut self) -> ProvisioningState {
        info!("Starting sandbox provisioning run");

        let mut server = None;
        let outcome = AssertUnwindSafe(self.provision(&mut server))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(PreviewError::Unknown {
                    reason: format!("Provisioning aborted: {}", panic_message(panic.as_ref())),
                })
            });

        match outcome {
            Ok(ready) => {
                info!("Dev server ready on port {} at {}", ready.port, ready.url);
                self.status_line(STATUS_READY);
                self.transition(ProvisioningState::Ready {
                    url: ready.url,
                    port: ready.port,
                });
            }
            Err(error) => self.fail(error),
        }

        if let Some(mut server) = server {
            self.follow_server_output(&mut server).await;
        }

        self.state
    }

    async fn provision(&mut self, server: &mut Option<DevServer>) -> PreviewResult<ServerReady> {
        self.setup().await?;
        self.install().await?;
        let listener = self.start_server(server).await?;
        match server.as_mut() {
            Some(dev_server) => self.await_ready(listener, dev_server).await,
            None => Err(PreviewError::Unknown {
                reason: "Dev server was not started".to_string(),
            }),
        }
    }

    /// Mount the fixed manifest, then the fixed dev-server config
    async fn setup(&mut self) -> PreviewResult<()> {
        self.transition(ProvisioningState::SettingUp);
        self.status_line(STATUS_SETTING_UP);

        let port = self.config.dev_server_port;

        self.status_line(STATUS_WRITING_MANIFEST);
        self.capability.mount(&manifest_tree(port)?).await?;

        self.status_line(STATUS_WRITING_CONFIG);
        self.capability.mount(&dev_server_config_tree(port)?).await?;

        debug!("Bootstrap files mounted");
        Ok(())
    }

    /// Install dependencies, bounded by the install timeout
    async fn install(&mut self) -> PreviewResult<()> {
        self.transition(ProvisioningState::Installing);
        self.status_line(STATUS_INSTALLING);

        let (command, args) = INSTALL_COMMAND;
        info!("Running {} {}", command, args.join(" "));
        let ProcessHandle {
            mut output,
            mut exit,
        } = self.capability.spawn(command, args).await?;

        let mut aggregator = LogAggregator::new();
        let mut guard = TimeoutGuard::new(self.config.install_timeout);

        let waited = guard
            .race(async {
                let mut output_open = true;
                loop {
                    tokio::select! {
                        biased;
                        chunk = output.next_chunk(), if output_open => match chunk {
                            Some(chunk) => self.record_output(&mut aggregator, &chunk),
                            None => output_open = false,
                        },
                        code = &mut exit => break code,
                    }
                }
            })
            .await;

        let phase = match waited {
            Err(elapsed) => {
                warn!("Dependency install timed out after {:?}", elapsed.after);
                PhaseResult::TimedOut
            }
            Ok(Err(error)) => PhaseResult::CapabilityError(error),
            Ok(Ok(exit_code)) => {
                // Output produced before exit may still be queued
                self.drain_output(&mut aggregator, &mut output);
                if exit_code == 0 {
                    PhaseResult::Success
                } else {
                    PhaseResult::ProcessFailed {
                        exit_code,
                        output: aggregator.contents().to_string(),
                    }
                }
            }
        };

        match phase {
            PhaseResult::Success => {
                info!("Dependencies installed");
                Ok(())
            }
            PhaseResult::TimedOut => Err(PreviewError::InstallTimeout {
                after: guard.duration(),
            }),
            PhaseResult::ProcessFailed { exit_code, output } => {
                Err(PreviewError::InstallFailed { exit_code, output })
            }
            PhaseResult::CapabilityError(error) => Err(error.into()),
        }
    }

    /// Register the ready listener, then spawn the dev server.
    ///
    /// The server's exit code is never awaited; it is expected to run
    /// indefinitely.
    async fn start_server(
        &mut self,
        server: &mut Option<DevServer>,
    ) -> PreviewResult<ReadyListener> {
        self.transition(ProvisioningState::StartingServer);
        self.status_line(STATUS_STARTING_SERVER);

        let listener = self.capability.on_server_ready();

        let (command, args) = DEV_SERVER_COMMAND;
        info!("Running {} {}", command, args.join(" "));
        let ProcessHandle { output, exit } = self.capability.spawn(command, args).await?;
        drop(exit);

        *server = Some(DevServer {
            output,
            aggregator: LogAggregator::new(),
        });
        Ok(listener)
    }

    /// Wait for the ready notification, bounded by the readiness timeout.
    /// Server output keeps flowing into the status log while waiting.
    async fn await_ready(
        &mut self,
        mut listener: ReadyListener,
        server: &mut DevServer,
    ) -> PreviewResult<ServerReady> {
        self.transition(ProvisioningState::AwaitingReady);

        let mut guard = TimeoutGuard::new(self.config.ready_timeout);
        let DevServer { output, aggregator } = server;

        let waited = guard
            .race(async {
                let mut output_open = true;
                let mut listening = true;
                loop {
                    tokio::select! {
                        biased;
                        chunk = output.next_chunk(), if output_open => match chunk {
                            Some(chunk) => self.record_output(aggregator, &chunk),
                            None => {
                                debug!("Dev server closed its output before becoming ready");
                                output_open = false;
                            }
                        },
                        ready = listener.recv(), if listening => match ready {
                            Some(ready) => break ready,
                            None => {
                                warn!("Sandbox stopped publishing ready notifications");
                                listening = false;
                            }
                        },
                        else => std::future::pending::<()>().await,
                    }
                }
            })
            .await;

        // Dropping the listener here removes its registration
        drop(listener);

        waited.map_err(|elapsed| {
            warn!("Dev server not ready after {:?}", elapsed.after);
            PreviewError::ReadinessTimeout {
                after: guard.duration(),
            }
        })
    }

    async fn follow_server_output(&mut self, server: &mut DevServer) {
        let DevServer { output, aggregator } = server;
        let log = &mut self.log;
        let sink = &self.sink;
        aggregator
            .attach(output, |chunk, _| {
                log.push_chunk(chunk);
                sink.log(chunk);
            })
            .await;
        info!(
            "Dev server output closed after {} chunks",
            aggregator.chunk_count()
        );
    }

    fn record_output(&mut self, aggregator: &mut LogAggregator, chunk: &str) {
        debug!("process output: {:?}", chunk);
        aggregator.push(chunk);
        self.log.push_chunk(chunk);
        self.sink.log(chunk);
    }

    fn drain_output(&mut self, aggregator: &mut LogAggregator, output: &mut OutputStream) {
        let log = &mut self.log;
        let sink = &self.sink;
        aggregator.drain_ready(output, |chunk, _| {
            debug!("process output: {:?}", chunk);
            log.push_chunk(chunk);
            sink.log(chunk);
        });
    }

    fn status_line(&mut self, message: &str) {
        let appended = self.log.push_line(message);
        self.sink.log(appended);
    }

    fn transition(&mut self, state: ProvisioningState) {
        debug!("Provisioning state -> {}", state.as_str());
        self.state = state.clone();
        self.sink.transition(state);
    }

    fn fail(&mut self, error: PreviewError) {
        error!("Sandbox provisioning failed ({}): {}", error.kind().as_str(), error);
        self.transition(ProvisioningState::Failed {
            failure: Failure::from(&error),
            log: self.log.snapshot(),
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return message;
    }
    match panic.downcast_ref::<String>() {
        Some(message) => message,
        None => "sandbox capability panicked",
    }
}
