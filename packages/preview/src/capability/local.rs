// ABOUTME: Host-process sandbox capability rooted in a private working directory
// ABOUTME: Mounts files to disk, spawns commands with streamed output and announces listening servers

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    CapabilityError, CapabilityResult, OutputStream, ProcessHandle, ReadyListener,
    SandboxCapability,
};
use crate::detector::detect_server_ready;
use crate::tree::VirtualFileTree;
use crate::types::ServerReady;
use crate::validation::validate_virtual_path;

const READY_CHANNEL_CAPACITY: usize = 16;

/// A process started by the sandbox that has not exited yet
struct TrackedProcess {
    command: String,
    kill: oneshot::Sender<()>,
}

/// Sandbox backed by processes on the host, confined to a fresh directory.
///
/// Not an isolation boundary: commands run with the caller's privileges.
pub struct LocalSandbox {
    workdir: PathBuf,
    ready_tx: broadcast::Sender<ServerReady>,
    processes: Arc<Mutex<HashMap<Uuid, TrackedProcess>>>,
}

impl LocalSandbox {
    /// Create a sandbox in a new uuid-named directory under `root`, or under
    /// the system temp directory when no root is given.
    pub async fn boot(root: Option<&Path>) -> CapabilityResult<Self> {
        let base = root
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let workdir = base.join(format!("devbox-{}", Uuid::new_v4()));

        tokio::fs::create_dir_all(&workdir).await.map_err(|e| {
            CapabilityError::Boot(format!(
                "Failed to create working directory {}: {}",
                workdir.display(),
                e
            ))
        })?;

        info!("Booted local sandbox in {}", workdir.display());

        let (ready_tx, _) = broadcast::channel(READY_CHANNEL_CAPACITY);
        Ok(Self {
            workdir,
            ready_tx,
            processes: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Number of spawned processes that have not exited yet
    pub async fn running_processes(&self) -> usize {
        self.processes.lock().await.len()
    }
}

#[async_trait]
impl SandboxCapability for LocalSandbox {
    async fn mount(&self, tree: &VirtualFileTree) -> CapabilityResult<()> {
        for (path, contents) in tree.iter() {
            validate_virtual_path(path).map_err(|reason| CapabilityError::InvalidPath {
                path: path.to_string(),
                reason,
            })?;

            let target = self.workdir.join(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| CapabilityError::Mount(format!("{}: {}", path, e)))?;
            }
            tokio::fs::write(&target, contents)
                .await
                .map_err(|e| CapabilityError::Mount(format!("{}: {}", path, e)))?;

            debug!("Mounted {} ({} bytes)", path, contents.len());
        }
        Ok(())
    }

    async fn spawn(&self, command: &str, args: &[&str]) -> CapabilityResult<ProcessHandle> {
        let command_line = if args.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", command, args.join(" "))
        };

        let mut child = Command::new(command)
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CapabilityError::Spawn {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        info!("Spawned '{}' with PID {:?}", command_line, child.id());

        let (chunk_tx, output) = OutputStream::channel();
        let announced = Arc::new(AtomicBool::new(false));
        let mut forwarders = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            forwarders.push(tokio::spawn(forward_lines(
                stdout,
                chunk_tx.clone(),
                self.ready_tx.clone(),
                announced.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(tokio::spawn(forward_lines(
                stderr,
                chunk_tx,
                self.ready_tx.clone(),
                announced,
            )));
        }

        let id = Uuid::new_v4();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        self.processes.lock().await.insert(
            id,
            TrackedProcess {
                command: command_line.clone(),
                kill: kill_tx,
            },
        );

        let processes = self.processes.clone();
        tokio::spawn(async move {
            // A dropped kill sender means the sandbox itself went away
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };

            let status = match exited {
                Some(status) => status,
                None => {
                    debug!("Killing '{}'", command_line);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill '{}': {}", command_line, e);
                    }
                    child.wait().await
                }
            };

            let code = match status {
                // Terminated by a signal
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    warn!("Failed to wait for '{}': {}", command_line, e);
                    -1
                }
            };

            processes.lock().await.remove(&id);

            // The exit code is reported only once every line has been forwarded
            for forwarder in forwarders {
                if let Err(e) = forwarder.await {
                    warn!("Output forwarder for '{}' failed: {}", command_line, e);
                }
            }

            info!("'{}' exited with code {}", command_line, code);
            let _ = exit_tx.send(code);
        });

        Ok(ProcessHandle::from_channels(output, exit_rx))
    }

    fn on_server_ready(&self) -> ReadyListener {
        ReadyListener::new(self.ready_tx.subscribe())
    }

    async fn terminate(&self) -> CapabilityResult<()> {
        let tracked: Vec<TrackedProcess> = self
            .processes
            .lock()
            .await
            .drain()
            .map(|(_, process)| process)
            .collect();

        info!("Terminating {} sandbox processes", tracked.len());
        for process in tracked {
            if process.kill.send(()).is_err() {
                debug!("'{}' already exited", process.command);
            }
        }
        Ok(())
    }
}

impl Drop for LocalSandbox {
    fn drop(&mut self) {
        // Dropping the kill senders stops every child still running
        if let Ok(mut processes) = self.processes.try_lock() {
            processes.clear();
        }
    }
}

/// Forward each line of a process pipe as one chunk, announcing the first
/// listening port seen across the process's pipes.
async fn forward_lines<R>(
    pipe: R,
    chunks: mpsc::UnboundedSender<String>,
    ready_tx: broadcast::Sender<ServerReady>,
    announced: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    let mut forwarding = true;

    while let Ok(Some(line)) = lines.next_line().await {
        if !announced.load(Ordering::SeqCst) {
            if let Some(ready) = detect_server_ready(&line) {
                announced.store(true, Ordering::SeqCst);
                info!("Detected server listening on port {}", ready.port);
                // No listeners is fine; nobody is waiting
                let _ = ready_tx.send(ready);
            }
        }

        // Keep reading after the consumer leaves so the pipe never fills
        if forwarding && chunks.send(format!("{}\n", line)).is_err() {
            forwarding = false;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn boot() -> (LocalSandbox, TempDir) {
        let root = TempDir::new().unwrap();
        let sandbox = LocalSandbox::boot(Some(root.path())).await.unwrap();
        (sandbox, root)
    }

    #[tokio::test]
    async fn test_boot_creates_private_workdir() {
        let (first, root) = boot().await;
        let second = LocalSandbox::boot(Some(root.path())).await.unwrap();

        assert!(first.workdir().is_dir());
        assert!(first.workdir().starts_with(root.path()));
        assert_ne!(first.workdir(), second.workdir());
    }

    #[tokio::test]
    async fn test_mount_writes_nested_files() {
        let (sandbox, _root) = boot().await;
        let tree = VirtualFileTree::new()
            .with_file("package.json", "{}")
            .unwrap()
            .with_file("src/main.jsx", "console.log(1)")
            .unwrap();

        sandbox.mount(&tree).await.unwrap();

        let written = std::fs::read_to_string(sandbox.workdir().join("src/main.jsx")).unwrap();
        assert_eq!(written, "console.log(1)");
        assert!(sandbox.workdir().join("package.json").is_file());
    }

    #[tokio::test]
    async fn test_spawn_streams_output_and_exit_code() {
        let (sandbox, _root) = boot().await;
        let mut handle = sandbox
            .spawn("sh", &["-c", "echo first; echo second; exit 3"])
            .await
            .unwrap();

        let mut collected = String::new();
        while let Some(chunk) = handle.output.next_chunk().await {
            collected.push_str(&chunk);
        }

        assert_eq!(collected, "first\nsecond\n");
        assert_eq!(handle.exit.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_exit_resolves_after_all_output_is_delivered() {
        let (sandbox, _root) = boot().await;
        let mut handle = sandbox
            .spawn("sh", &["-c", "seq 1 3000; echo 'npm ERR! killed' >&2; exit 137"])
            .await
            .unwrap();

        assert_eq!(handle.exit.await.unwrap(), 137);

        // Everything must already be buffered when the exit code arrives
        let mut lines = Vec::new();
        while let Some(chunk) = handle.output.try_next_chunk() {
            lines.push(chunk);
        }
        assert_eq!(lines.len(), 3001);
        assert_eq!(lines.iter().filter(|l| l.starts_with("npm ERR!")).count(), 1);
        let numbers: Vec<&String> = lines.iter().filter(|l| !l.starts_with("npm")).collect();
        assert_eq!(numbers.first().map(|l| l.as_str()), Some("1\n"));
        assert_eq!(numbers.last().map(|l| l.as_str()), Some("3000\n"));
        assert_eq!(handle.output.next_chunk().await, None);
    }

    #[tokio::test]
    async fn test_spawn_missing_command_fails() {
        let (sandbox, _root) = boot().await;
        let result = sandbox.spawn("devbox-no-such-command", &[]).await;
        assert!(matches!(result, Err(CapabilityError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_ready_notification_from_server_banner() {
        let (sandbox, _root) = boot().await;
        let mut listener = sandbox.on_server_ready();

        let _handle = sandbox
            .spawn("sh", &["-c", "echo '  Local:   http://localhost:5173/'; sleep 5"])
            .await
            .unwrap();

        let ready = tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ready.port, 5173);
        assert_eq!(ready.url, "http://localhost:5173");

        sandbox.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_kills_running_processes() {
        let (sandbox, _root) = boot().await;
        let handle = sandbox.spawn("sleep", &["30"]).await.unwrap();
        assert_eq!(sandbox.running_processes().await, 1);

        sandbox.terminate().await.unwrap();

        let code = tokio::time::timeout(Duration::from_secs(5), handle.exit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, -1);
        assert_eq!(sandbox.running_processes().await, 0);
        // Nothing left to stop
        sandbox.terminate().await.unwrap();
    }
}
