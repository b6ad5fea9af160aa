// ABOUTME: Deadline enforcement for pending provisioning steps
// ABOUTME: Races a future against a timer and clears the timer on either outcome

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Instant, Sleep};

/// The deadline won the race
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline of {after:?} elapsed")]
pub struct DeadlineElapsed {
    pub after: Duration,
}

/// Bounds the wait for one pending step.
///
/// Expiry abandons the wait only; the operation being waited on keeps
/// running wherever it runs. The timer exists only while a race is in
/// progress.
#[derive(Debug)]
pub struct TimeoutGuard {
    duration: Duration,
    timer: Option<Pin<Box<Sleep>>>,
}

impl TimeoutGuard {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            timer: None,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether a timer is currently pending
    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Await `operation` or the deadline, whichever comes first.
    pub async fn race<F>(&mut self, operation: F) -> Result<F::Output, DeadlineElapsed>
    where
        F: Future,
    {
        let timer = self.timer.insert(Box::pin(sleep(self.duration)));
        tokio::pin!(operation);

        let outcome = tokio::select! {
            biased;
            output = &mut operation => Ok(output),
            _ = timer.as_mut() => Err(DeadlineElapsed { after: self.duration }),
        };

        self.clear();
        outcome
    }

    /// When the pending timer is due, if one is armed
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.as_ref().map(|timer| timer.deadline())
    }

    /// Drop the pending timer so it can never fire
    pub fn clear(&mut self) {
        self.timer = None;
    }
}
