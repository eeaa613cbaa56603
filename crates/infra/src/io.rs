//! Deadline and cancellation plumbing for external calls.
//!
//! Every call that leaves the process (download, provider upload, transcription,
//! embedding) runs through [`CallContext::run`], which bounds it by the smaller of
//! the per-step timeout and the time left until the job deadline, and aborts it
//! when the job is cancelled.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why an external call did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("{step} timed out after {after:?}")]
    TimedOut { step: &'static str, after: Duration },
    #[error("{step} cancelled")]
    Cancelled { step: &'static str },
}

/// `now + budget`, saturating at a far-future instant instead of overflowing.
pub fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget)
        .unwrap_or_else(|| now + Duration::from_secs(30 * 365 * 24 * 60 * 60))
}

/// Per-job execution context: an absolute deadline plus a cancellation token.
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new(budget: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: deadline_after(budget),
            cancel,
        }
    }

    /// Context with a deadline but no external cancellation source.
    pub fn with_budget(budget: Duration) -> Self {
        Self::new(budget, CancellationToken::new())
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `fut` bounded by `limit` and the job deadline, whichever comes first.
    pub async fn run<F>(&self, step: &'static str, limit: Duration, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled { step });
        }
        let budget = limit.min(self.remaining());
        if budget.is_zero() {
            return Err(Interrupted::TimedOut { step, after: budget });
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled { step }),
            res = tokio::time::timeout(budget, fut) => {
                res.map_err(|_| Interrupted::TimedOut { step, after: budget })
            }
        }
    }

    /// Sleep for `delay` unless the deadline or cancellation comes first.
    pub async fn pause(&self, step: &'static str, delay: Duration) -> Result<(), Interrupted> {
        if delay >= self.remaining() {
            return Err(Interrupted::TimedOut {
                step,
                after: self.remaining(),
            });
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled { step }),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
