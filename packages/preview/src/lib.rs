//! Devbox Preview - ephemeral sandbox provisioning for dev-server previews
//!
//! This crate boots a development server inside a sandbox capability and
//! surfaces its endpoint: it mounts a fixed manifest and dev-server config,
//! installs dependencies, starts the server and waits for the sandbox to
//! report it reachable, streaming every step to a status channel.

pub mod capability;
pub mod config;
pub mod detector;
pub mod env;
pub mod guard;
pub mod lifecycle;
pub mod log;
pub mod manifest;
pub mod orchestrator;
pub mod sink;
pub mod tree;
pub mod types;
pub mod validation;

// Re-export key types and functions for easier use
pub use capability::{
    CapabilityError, CapabilityResult, LocalSandbox, OutputStream, ProcessHandle, ReadyListener,
    SandboxCapability,
};
pub use config::PreviewConfig;
pub use guard::{DeadlineElapsed, TimeoutGuard};
pub use lifecycle::{check_secure_context, PreviewSession};
pub use log::{LogAggregator, StatusLog};
pub use orchestrator::Provisioner;
pub use sink::{status_channel, StatusReceiver, StatusSink};
pub use tree::VirtualFileTree;
pub use types::{
    Failure, FailureKind, PhaseResult, PreviewError, PreviewResult, ProvisioningState,
    ServerReady, StatusReport, StatusUpdate,
};

/// Provision a preview in a booted sandbox and return the status channel.
///
/// Spawns the run onto the current tokio runtime. The returned receiver sees
/// every phase transition and every chunk of process output in order.
///
/// # Examples
///
/// ```no_run
/// use devbox_preview::{provision, LocalSandbox, PreviewConfig};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let sandbox = LocalSandbox::boot(None).await.expect("Failed to boot sandbox");
///     let mut status = provision(Arc::new(sandbox), PreviewConfig::from_env());
///
///     let report = status.wait_terminal().await;
///     match report.endpoint() {
///         Some(url) => println!("Preview ready at {}", url),
///         None => eprintln!("Preview failed:\n{}", report.log),
///     }
/// }
/// ```
pub fn provision(
    capability: std::sync::Arc<dyn SandboxCapability>,
    config: PreviewConfig,
) -> StatusReceiver {
    let (sink, receiver) = status_channel();
    tokio::spawn(Provisioner::new(capability, config, sink).run());
    receiver
}

/// Version information for the preview crate.
///
/// This constant contains the version string from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
