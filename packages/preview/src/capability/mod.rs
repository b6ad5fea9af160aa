// ABOUTME: Sandbox capability trait and the process handle types it produces
// ABOUTME: Defines the boundary between the provisioning orchestrator and an execution environment

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::tree::VirtualFileTree;
use crate::types::ServerReady;

pub mod local;

pub use local::LocalSandbox;

/// Command issued on teardown to stop everything the sandbox started
pub const TEARDOWN_COMMAND: &str = "pkill";
pub const TEARDOWN_ARGS: &[&str] = &["-f", "node"];

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("Failed to boot sandbox: {0}")]
    Boot(String),

    #[error("Failed to mount files: {0}")]
    Mount(String),

    #[error("Failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Process exited without reporting a status")]
    ProcessLost,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

/// Text output of a spawned process, chunk by chunk in production order.
///
/// The sequence is lazy and unbounded: it ends only when the process closes
/// its output, and it cannot be restarted.
pub struct OutputStream {
    pub receiver: mpsc::UnboundedReceiver<String>,
}

impl OutputStream {
    pub fn new(receiver: mpsc::UnboundedReceiver<String>) -> Self {
        Self { receiver }
    }

    /// Create a connected sender/stream pair
    pub fn channel() -> (mpsc::UnboundedSender<String>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    /// Next chunk, or `None` once the process has closed its output
    pub async fn next_chunk(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Next chunk only if one is already buffered
    pub fn try_next_chunk(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }
}

/// Resolves exactly once with the process exit code
pub type ExitStatusFuture = BoxFuture<'static, CapabilityResult<i32>>;

/// A running process inside the sandbox
pub struct ProcessHandle {
    pub output: OutputStream,
    pub exit: ExitStatusFuture,
}

impl ProcessHandle {
    pub fn new(output: OutputStream, exit: ExitStatusFuture) -> Self {
        Self { output, exit }
    }

    /// Build a handle whose exit code is delivered through a oneshot channel.
    /// A dropped sender resolves the exit future with [`CapabilityError::ProcessLost`].
    pub fn from_channels(output: OutputStream, exit: oneshot::Receiver<i32>) -> Self {
        let exit = async move { exit.await.map_err(|_| CapabilityError::ProcessLost) }.boxed();
        Self::new(output, exit)
    }
}

/// One registration for the sandbox's server-ready notification.
///
/// Only events published after registration are observed. Dropping the
/// listener removes the registration.
pub struct ReadyListener {
    receiver: broadcast::Receiver<ServerReady>,
}

impl ReadyListener {
    pub fn new(receiver: broadcast::Receiver<ServerReady>) -> Self {
        Self { receiver }
    }

    /// Wait for the next ready notification. Returns `None` once the sandbox
    /// can no longer publish any.
    pub async fn recv(&mut self) -> Option<ServerReady> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Ready listener skipped {} stale notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// An already-booted, isolated execution environment.
///
/// Implementations accept virtual file mounts, spawn commands with streamed
/// output and publish a notification when a spawned server becomes reachable.
#[async_trait]
pub trait SandboxCapability: Send + Sync {
    /// Write every file of the tree into the sandbox
    async fn mount(&self, tree: &VirtualFileTree) -> CapabilityResult<()>;

    /// Start a command inside the sandbox
    async fn spawn(&self, command: &str, args: &[&str]) -> CapabilityResult<ProcessHandle>;

    /// Register a listener for the server-ready notification
    fn on_server_ready(&self) -> ReadyListener;

    /// Ask the sandbox to stop the processes it is running. Best-effort: the
    /// sandbox may ignore targets it does not know.
    async fn terminate(&self) -> CapabilityResult<()> {
        self.spawn(TEARDOWN_COMMAND, TEARDOWN_ARGS).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_output_stream_preserves_order() {
        let (tx, mut stream) = OutputStream::channel();
        tx.send("a".to_string()).unwrap();
        tx.send("bc".to_string()).unwrap();
        drop(tx);

        assert_eq!(stream.next_chunk().await.as_deref(), Some("a"));
        assert_eq!(stream.try_next_chunk().as_deref(), Some("bc"));
        assert_eq!(stream.next_chunk().await, None);
    }

    #[tokio::test]
    async fn test_exit_future_reports_lost_process() {
        let (_tx, output) = OutputStream::channel();
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        let handle = ProcessHandle::from_channels(output, exit_rx);
        drop(exit_tx);

        assert!(matches!(handle.exit.await, Err(CapabilityError::ProcessLost)));
    }

    #[tokio::test]
    async fn test_ready_listener_sees_only_later_events() {
        let (tx, initial_rx) = broadcast::channel(4);
        tx.send(ServerReady {
            port: 1,
            url: "http://localhost:1".to_string(),
        })
        .unwrap();

        let mut listener = ReadyListener::new(tx.subscribe());
        tx.send(ServerReady {
            port: 2,
            url: "http://localhost:2".to_string(),
        })
        .unwrap();

        assert_eq!(listener.recv().await.map(|r| r.port), Some(2));
        drop(tx);
        drop(initial_rx);
        assert_eq!(listener.recv().await, None);
    }
}
