// ABOUTME: Scripted sandbox capability shared by the integration tests
// ABOUTME: Records every capability call and plays back per-command output scripts

#![allow(dead_code)]

use async_trait::async_trait;
use devbox_preview::{
    CapabilityError, CapabilityResult, OutputStream, ProcessHandle, ReadyListener,
    SandboxCapability, ServerReady, StatusReceiver, VirtualFileTree,
};
use futures::FutureExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

pub const INSTALL: &str = "npm install";
pub const DEV: &str = "npm run dev";
pub const TEARDOWN: &str = "pkill -f node";

/// One step of a scripted process
#[derive(Debug, Clone)]
pub enum Step {
    Output(&'static str),
    Sleep(Duration),
    Exit(i32),
    Ready(u16),
    /// Close output and drop the exit status
    Close,
}

/// Capability calls in the order they were made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Mount(Vec<String>),
    Spawn(String),
    /// The orchestrator observed an exit future resolve
    ExitObserved { command: String, code: i32 },
}

#[derive(Default)]
pub struct ScriptedSandbox {
    scripts: Mutex<HashMap<String, VecDeque<Vec<Step>>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    mount_error: Option<String>,
    rejected: HashSet<String>,
    panicking: HashSet<String>,
    ready_tx: Option<broadcast::Sender<ServerReady>>,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        let (ready_tx, _) = broadcast::channel(16);
        Self {
            ready_tx: Some(ready_tx),
            ..Default::default()
        }
    }

    /// Queue a script for the next spawn of `command`
    pub fn script(self, command: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(steps);
        self
    }

    pub fn failing_mount(mut self, message: &str) -> Self {
        self.mount_error = Some(message.to_string());
        self
    }

    /// Spawns of `command` fail
    pub fn rejecting(mut self, command: &str) -> Self {
        self.rejected.insert(command.to_string());
        self
    }

    /// Spawns of `command` panic inside the capability
    pub fn panicking(mut self, command: &str) -> Self {
        self.panicking.insert(command.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn spawns(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Spawn(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn spawn_count(&self, command: &str) -> usize {
        self.spawns().iter().filter(|c| c.as_str() == command).count()
    }

    pub fn ready_listeners(&self) -> usize {
        self.ready_sender().receiver_count()
    }

    pub fn publish_ready(&self, port: u16) {
        let _ = self.ready_sender().send(ready_on(port));
    }

    fn ready_sender(&self) -> &broadcast::Sender<ServerReady> {
        self.ready_tx
            .as_ref()
            .expect("ScriptedSandbox must be built with new()")
    }
}

pub fn ready_on(port: u16) -> ServerReady {
    ServerReady {
        port,
        url: format!("http://localhost:{}", port),
    }
}

#[async_trait]
impl SandboxCapability for ScriptedSandbox {
    async fn mount(&self, tree: &VirtualFileTree) -> CapabilityResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Mount(tree.paths().map(str::to_string).collect()));
        match &self.mount_error {
            Some(message) => Err(CapabilityError::Mount(message.clone())),
            None => Ok(()),
        }
    }

    async fn spawn(&self, command: &str, args: &[&str]) -> CapabilityResult<ProcessHandle> {
        let command_line = std::iter::once(command)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(Call::Spawn(command_line.clone()));

        if self.panicking.contains(&command_line) {
            panic!("sandbox crashed while spawning '{}'", command_line);
        }

        if self.rejected.contains(&command_line) {
            return Err(CapabilityError::Spawn {
                command: command_line,
                reason: "rejected by sandbox".to_string(),
            });
        }

        let steps = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&command_line)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();

        let (output_tx, output) = OutputStream::channel();
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        let ready_tx = self.ready_sender().clone();

        tokio::spawn(async move {
            let mut exit_tx = Some(exit_tx);
            for step in steps {
                match step {
                    Step::Output(text) => {
                        let _ = output_tx.send(text.to_string());
                    }
                    Step::Sleep(duration) => tokio::time::sleep(duration).await,
                    Step::Exit(code) => {
                        if let Some(tx) = exit_tx.take() {
                            let _ = tx.send(code);
                        }
                    }
                    Step::Ready(port) => {
                        let _ = ready_tx.send(ready_on(port));
                    }
                    Step::Close => return,
                }
            }
            // Script exhausted: the process keeps running silently
            let _keep = (output_tx, exit_tx);
            std::future::pending::<()>().await;
        });

        let calls = self.calls.clone();
        let exit = async move {
            let code = exit_rx.await.map_err(|_| CapabilityError::ProcessLost)?;
            calls.lock().unwrap().push(Call::ExitObserved {
                command: command_line,
                code,
            });
            Ok(code)
        }
        .boxed();

        Ok(ProcessHandle::new(output, exit))
    }

    fn on_server_ready(&self) -> ReadyListener {
        ReadyListener::new(self.ready_sender().subscribe())
    }
}

pub fn as_capability(sandbox: &Arc<ScriptedSandbox>) -> Arc<dyn SandboxCapability> {
    sandbox.clone()
}

/// Files that satisfy the non-empty precondition
pub fn project_files() -> VirtualFileTree {
    VirtualFileTree::new()
        .with_file("src/App.jsx", "export default function App() { return null }")
        .unwrap()
}

/// Pull updates until the log contains `needle` or the channel closes
pub async fn wait_for_log(receiver: &mut StatusReceiver, needle: &str) -> bool {
    while !receiver.log().contains(needle) {
        if receiver.recv().await.is_none() {
            return false;
        }
    }
    true
}

/// Pull updates until the state has the given name or the channel closes
pub async fn wait_for_state(receiver: &mut StatusReceiver, name: &str) -> bool {
    while receiver.state().as_str() != name {
        if receiver.recv().await.is_none() {
            return false;
        }
    }
    true
}
