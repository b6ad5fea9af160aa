// ABOUTME: Status channel from one provisioning run to the presentation layer
// ABOUTME: Append-only and order-preserving; one sink per run

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{ProvisioningState, StatusReport, StatusUpdate};

/// Sending half, owned exclusively by one run
#[derive(Debug)]
pub struct StatusSink {
    sender: mpsc::UnboundedSender<StatusUpdate>,
}

/// Receiving half, handed to whoever renders the run
#[derive(Debug)]
pub struct StatusReceiver {
    receiver: mpsc::UnboundedReceiver<StatusUpdate>,
    report: StatusReport,
}

/// Create a connected sink/receiver pair for a new run
pub fn status_channel() -> (StatusSink, StatusReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        StatusSink { sender },
        StatusReceiver {
            receiver,
            report: StatusReport::default(),
        },
    )
}

impl StatusSink {
    pub fn transition(&self, state: ProvisioningState) {
        self.send(StatusUpdate::Transition {
            timestamp: Utc::now(),
            state,
        });
    }

    pub fn log(&self, text: impl Into<String>) {
        self.send(StatusUpdate::Log {
            timestamp: Utc::now(),
            text: text.into(),
        });
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    // A consumer that stopped listening does not stop the run
    fn send(&self, update: StatusUpdate) {
        if self.sender.send(update).is_err() {
            debug!("Status receiver dropped; update discarded");
        }
    }
}

impl StatusReceiver {
    /// Next update, folded into [`report`](Self::report) before it is returned
    pub async fn recv(&mut self) -> Option<StatusUpdate> {
        let update = self.receiver.recv().await?;
        self.report.apply(&update);
        Some(update)
    }

    /// Fold every update already delivered, without waiting
    pub fn drain(&mut self) -> Vec<StatusUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.receiver.try_recv() {
            self.report.apply(&update);
            updates.push(update);
        }
        updates
    }

    /// Wait until the run reaches Ready or Failed (or the run goes away)
    pub async fn wait_terminal(&mut self) -> &StatusReport {
        while !self.report.state.is_terminal() {
            if self.recv().await.is_none() {
                break;
            }
        }
        &self.report
    }

    pub fn report(&self) -> &StatusReport {
        &self.report
    }

    pub fn state(&self) -> &ProvisioningState {
        &self.report.state
    }

    pub fn log(&self) -> &str {
        &self.report.log
    }
}
