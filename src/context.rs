//! Caller-controlled cancellation and deadline for one operation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::LongPollError;

/// Cancellable context passed to every network-facing operation.
///
/// Cloning shares the cancellation token; cancelling any clone aborts
/// operations running under all of them.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `future` until it completes, the token fires or the deadline
    /// passes. `target` names what was being awaited in the error.
    pub async fn run<F>(&self, target: &str, future: F) -> Result<F::Output, LongPollError>
    where
        F: Future,
    {
        if self.cancel.is_cancelled() {
            return Err(LongPollError::Cancelled {
                target: target.to_owned(),
            });
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LongPollError::Cancelled {
                target: target.to_owned(),
            }),
            _ = deadline => Err(LongPollError::DeadlineExceeded {
                target: target.to_owned(),
            }),
            output = future => Ok(output),
        }
    }
}
