//! # Retry budget for consumption calls.
//!
//! ```text
//! attempt 1 ──► Ok ───────────────────────────► Ok(value)
//!    │
//!    ├─ Fatal / Canceled ──────────────────────► Err(error)       (never retried)
//!    └─ Recoverable
//!         ├─ retries used == max_retries ──────► Err(Exhausted)
//!         └─ sleep(backoff.next(retry)) ───────► attempt n+1      (cancellable)
//! ```

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::BackoffPolicy;
use crate::error::ConsumerError;

/// How many times a recoverable consumption failure is retried, and how long to wait between.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt (`0` = no retry).
    pub max_retries: u32,
    /// Delay between attempts.
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    /// Two retries with [`BackoffPolicy::default`].
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    pub const fn new(max_retries: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Total attempts the policy allows, including the first.
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Runs `op` until it succeeds, fails fatally, or the budget runs out.
    ///
    /// `op` receives the 1-based attempt number. Backoff sleeps end early with
    /// [`ConsumerError::Canceled`] when `token` is cancelled.
    pub async fn run<F, Fut, T>(&self, token: &CancellationToken, mut op: F) -> Result<T, ConsumerError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ConsumerError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            let retry = attempt - 1;
            if retry >= self.max_retries {
                return Err(ConsumerError::Exhausted {
                    attempts: attempt,
                    error: err.to_string(),
                });
            }

            let delay = self.backoff.next(retry);
            debug!(target: "evalbus.retry", attempt, ?delay, error = %err, "retrying consumption");
            tokio::select! {
                _ = token.cancelled() => return Err(ConsumerError::Canceled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
