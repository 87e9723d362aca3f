//! # Countdown latch with an extendable deadline.
//!
//! [`DeadlineLatch`] waits for a count to reach zero, but gives up when no liveness signal
//! arrives for a whole timeout period. Every [`DeadlineLatch::reset_clock`] pushes the
//! deadline to `now + timeout`, so slow but progressing work is never abandoned:
//!
//! ```text
//! await_timeout(T) ──────────────┬────────────────┬──────────────► count == 0 → true
//!                    reset_clock() (deadline = now + T)     │
//!                                         reset_clock() ────┘
//!
//! await_timeout(T) ─────────────── T elapses, no reset ──────────► false (timed out)
//! ```
//!
//! ## Rules
//! - The deadline is shared by all waiters; the most recent `await_timeout` sets the timeout.
//! - `reset_clock()` before any wait only counts the reset; no deadline exists yet.
//! - `count_down()` at zero is a no-op.
//! - Time comes from `tokio::time`, so paused-clock tests are deterministic.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct LatchState {
    count: u64,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    resets: u64,
    timed_out: bool,
}

/// Countdown latch whose wait deadline can be pushed forward.
#[derive(Debug)]
pub struct DeadlineLatch {
    state: Mutex<LatchState>,
    notify: Notify,
}

impl DeadlineLatch {
    /// Creates a latch that opens after `count` calls to [`DeadlineLatch::count_down`].
    pub fn new(count: u64) -> Self {
        Self {
            state: Mutex::new(LatchState {
                count,
                timeout: None,
                deadline: None,
                resets: 0,
                timed_out: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decrements the count, waking waiters when it reaches zero.
    pub fn count_down(&self) {
        let opened = {
            let mut state = self.lock();
            if state.count == 0 {
                return;
            }
            state.count -= 1;
            state.count == 0
        };
        if opened {
            self.notify.notify_waiters();
        }
    }

    /// Current count.
    pub fn count(&self) -> u64 {
        self.lock().count
    }

    /// Extends the deadline to the current timeout from now.
    pub fn reset_clock(&self) {
        {
            let mut state = self.lock();
            state.resets += 1;
            if let Some(timeout) = state.timeout {
                state.deadline = Some(deadline_after(timeout));
            }
        }
        self.notify.notify_waiters();
    }

    /// Number of [`DeadlineLatch::reset_clock`] calls so far.
    pub fn reset_count(&self) -> u64 {
        self.lock().resets
    }

    /// True if a wait on this latch ever ended by timeout.
    pub fn timed_out(&self) -> bool {
        self.lock().timed_out
    }

    /// Waits until the count reaches zero or `timeout` passes without a clock reset.
    ///
    /// Returns `true` when the latch opened, `false` on timeout.
    pub async fn await_timeout(&self, timeout: Duration) -> bool {
        {
            let mut state = self.lock();
            if state.count == 0 {
                return true;
            }
            state.timeout = Some(timeout);
            state.deadline = Some(deadline_after(timeout));
        }

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.lock();
                if state.count == 0 {
                    return true;
                }
                let deadline = state.deadline.unwrap_or_else(Instant::now);
                if Instant::now() >= deadline {
                    state.timed_out = true;
                    return false;
                }
                deadline
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    // Roughly 30 years, same horizon tokio uses for "never".
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}
