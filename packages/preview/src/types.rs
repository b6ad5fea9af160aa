use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capability::CapabilityError;

/// Provisioning phase a run is currently in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProvisioningState {
    Idle,
    SettingUp,
    Installing,
    StartingServer,
    AwaitingReady,
    Ready { url: String, port: u16 },
    Failed { failure: Failure, log: String },
}

impl ProvisioningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningState::Idle => "idle",
            ProvisioningState::SettingUp => "setting_up",
            ProvisioningState::Installing => "installing",
            ProvisioningState::StartingServer => "starting_server",
            ProvisioningState::AwaitingReady => "awaiting_ready",
            ProvisioningState::Ready { .. } => "ready",
            ProvisioningState::Failed { .. } => "failed",
        }
    }

    /// Ready and Failed are terminal; no transition follows them within a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Ready { .. } | ProvisioningState::Failed { .. }
        )
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ProvisioningState::Ready { url, .. } => Some(url),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            ProvisioningState::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

/// Outcome of a single phase. Terminal once produced.
#[derive(Debug)]
pub enum PhaseResult {
    Success,
    TimedOut,
    ProcessFailed { exit_code: i32, output: String },
    CapabilityError(CapabilityError),
}

/// Classification of a terminal failure, as shown to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    EnvironmentUnsupported,
    CapabilityError,
    InstallTimeout,
    InstallFailed,
    ReadinessTimeout,
    UnknownFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::EnvironmentUnsupported => "environment_unsupported",
            FailureKind::CapabilityError => "capability_error",
            FailureKind::InstallTimeout => "install_timeout",
            FailureKind::InstallFailed => "install_failed",
            FailureKind::ReadinessTimeout => "readiness_timeout",
            FailureKind::UnknownFailure => "unknown_failure",
        }
    }
}

/// A terminal failure: what went wrong and a message fit for an operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Output of the failed process, verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl From<&PreviewError> for Failure {
    fn from(error: &PreviewError) -> Self {
        let (exit_code, output) = match error {
            PreviewError::InstallFailed { exit_code, output } => {
                (Some(*exit_code), Some(output.clone()))
            }
            _ => (None, None),
        };
        Failure {
            kind: error.kind(),
            message: error.to_string(),
            exit_code,
            output,
        }
    }
}

/// Notification from the sandbox that a spawned server is reachable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerReady {
    pub port: u16,
    pub url: String,
}

/// One entry on the status channel between a run and the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StatusUpdate {
    /// The run moved to a new phase
    Transition {
        timestamp: DateTime<Utc>,
        state: ProvisioningState,
    },
    /// Text appended to the run's status log
    Log {
        timestamp: DateTime<Utc>,
        text: String,
    },
}

/// Folded view of a run's status channel: the discrete state plus the one
/// append-updated status string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: ProvisioningState,
    pub log: String,
}

impl Default for StatusReport {
    fn default() -> Self {
        Self {
            state: ProvisioningState::Idle,
            log: String::new(),
        }
    }
}

impl StatusReport {
    pub fn apply(&mut self, update: &StatusUpdate) {
        match update {
            StatusUpdate::Transition { state, .. } => self.state = state.clone(),
            StatusUpdate::Log { text, .. } => self.log.push_str(text),
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.state.endpoint()
    }
}

/// Error types for provisioning operations
#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("Sandbox requires a secure context (HTTPS or localhost), got origin '{origin}'")]
    EnvironmentUnsupported { origin: String },

    #[error("{0}")]
    Capability(#[from] CapabilityError),

    #[error("npm install failed: Installation timed out after {}", describe_duration(.after))]
    InstallTimeout { after: Duration },

    #[error("npm install failed: Installation failed with code {exit_code}\nOutput: {output}")]
    InstallFailed { exit_code: i32, output: String },

    #[error("Development server failed to start within {}", describe_duration(.after))]
    ReadinessTimeout { after: Duration },

    #[error("{reason}")]
    Unknown { reason: String },
}

impl PreviewError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PreviewError::EnvironmentUnsupported { .. } => FailureKind::EnvironmentUnsupported,
            PreviewError::Capability(_) => FailureKind::CapabilityError,
            PreviewError::InstallTimeout { .. } => FailureKind::InstallTimeout,
            PreviewError::InstallFailed { .. } => FailureKind::InstallFailed,
            PreviewError::ReadinessTimeout { .. } => FailureKind::ReadinessTimeout,
            PreviewError::Unknown { .. } => FailureKind::UnknownFailure,
        }
    }
}

/// Result type for provisioning operations
pub type PreviewResult<T> = Result<T, PreviewError>;

/// Render a bound the way an operator reads it: "2 minutes", "1 minute", "45 seconds".
pub fn describe_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return format!("{} milliseconds", duration.as_millis());
    }
    if secs % 60 == 0 {
        let minutes = secs / 60;
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{} minutes", minutes)
        }
    } else if secs == 1 {
        "1 second".to_string()
    } else {
        format!("{} seconds", secs)
    }
}
