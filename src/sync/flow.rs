//! # Producer-side flow control.
//!
//! [`FlowController`] compares the number of statistics published against what the slowest
//! negotiated consumer has acknowledged (via `CONSUMPTION_ONGOING` counts).
//!
//! ```text
//! outstanding = published - min(acknowledged per consumer)
//!
//! running ── outstanding > high ──► paused ── outstanding < low ──► running
//! ```
//!
//! ## Rules
//! - Advisory: a publisher may overshoot `high` while a pause propagates.
//! - No registered consumers → nothing is outstanding.
//! - Acknowledged counts are monotonic; stale heartbeats never lower them.
//! - [`FlowController::stop`] releases any pause permanently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use crate::message::ConsumerId;

/// Backpressure between one publisher and its negotiated consumers.
#[derive(Debug)]
pub struct FlowController {
    limits: Option<(u64, u64)>,
    published: AtomicU64,
    acknowledged: Mutex<HashMap<ConsumerId, u64>>,
    paused: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl FlowController {
    /// Creates a controller; `limits` is `(high, low)` or `None` to disable flow control.
    pub fn new(limits: Option<(u64, u64)>) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            limits,
            published: AtomicU64::new(0),
            acknowledged: Mutex::new(HashMap::new()),
            paused,
            stopped: AtomicBool::new(false),
        }
    }

    /// A controller that never pauses.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    fn acks(&self) -> MutexGuard<'_, HashMap<ConsumerId, u64>> {
        self.acknowledged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts tracking a consumer at zero acknowledged messages.
    pub fn register(&self, consumer_id: ConsumerId) {
        self.acks().entry(consumer_id).or_insert(0);
        self.update();
    }

    /// Records one published statistics message.
    pub fn on_published(&self) {
        self.published.fetch_add(1, Ordering::SeqCst);
        self.update();
    }

    /// Records that `consumer_id` has consumed `consumed` messages in total.
    ///
    /// Unregistered consumers are ignored.
    pub fn on_acknowledged(&self, consumer_id: &ConsumerId, consumed: u64) {
        {
            let mut acks = self.acks();
            match acks.get_mut(consumer_id) {
                Some(ack) => *ack = (*ack).max(consumed),
                None => return,
            }
        }
        self.update();
    }

    /// Published but not yet acknowledged by the slowest consumer.
    pub fn outstanding(&self) -> u64 {
        let published = self.published.load(Ordering::SeqCst);
        let slowest = self.acks().values().copied().min();
        slowest.map_or(0, |ack| published.saturating_sub(ack))
    }

    /// True while publication should wait.
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Waits until publication may proceed.
    pub async fn wait_for_capacity(&self) {
        let mut rx = self.paused.subscribe();
        while *rx.borrow_and_update() {
            if self.stopped.load(Ordering::SeqCst) || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Releases any pause and disables further pausing.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.paused.send_replace(false);
    }

    fn update(&self) {
        let Some((high, low)) = self.limits else {
            return;
        };
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let outstanding = self.outstanding();
        self.paused.send_if_modified(|paused| {
            if !*paused && outstanding > high {
                debug!(target: "evalbus.flow", outstanding, high, "pausing publication");
                *paused = true;
                true
            } else if *paused && outstanding < low {
                debug!(target: "evalbus.flow", outstanding, low, "resuming publication");
                *paused = false;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn consumer() -> ConsumerId {
        ConsumerId::new("c1")
    }

    #[test]
    fn test_pauses_above_high_and_resumes_below_low() {
        let flow = FlowController::new(Some((3, 2)));
        flow.register(consumer());

        for _ in 0..3 {
            flow.on_published();
        }
        assert!(!flow.is_paused());
        flow.on_published();
        assert!(flow.is_paused());
        assert_eq!(flow.outstanding(), 4);

        flow.on_acknowledged(&consumer(), 2);
        assert!(flow.is_paused(), "outstanding 2 is not below low water 2");
        flow.on_acknowledged(&consumer(), 3);
        assert!(!flow.is_paused());
    }

    #[test]
    fn test_slowest_consumer_governs() {
        let flow = FlowController::new(Some((2, 1)));
        flow.register(ConsumerId::new("fast"));
        flow.register(ConsumerId::new("slow"));
        for _ in 0..3 {
            flow.on_published();
        }
        flow.on_acknowledged(&ConsumerId::new("fast"), 3);
        assert!(flow.is_paused());
        assert_eq!(flow.outstanding(), 3);

        flow.on_acknowledged(&ConsumerId::new("slow"), 1);
        flow.on_acknowledged(&ConsumerId::new("slow"), 0);
        assert_eq!(flow.outstanding(), 2, "acks never go backwards");
    }

    #[test]
    fn test_disabled_and_unregistered() {
        let flow = FlowController::disabled();
        flow.register(consumer());
        for _ in 0..100 {
            flow.on_published();
        }
        assert!(!flow.is_paused());

        let flow = FlowController::new(Some((1, 1)));
        for _ in 0..10 {
            flow.on_published();
        }
        assert_eq!(flow.outstanding(), 0);
        flow.on_acknowledged(&consumer(), 5);
        assert!(!flow.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_until_acknowledged() {
        let flow = Arc::new(FlowController::new(Some((1, 1))));
        flow.register(consumer());
        flow.on_published();
        flow.on_published();
        assert!(flow.is_paused());

        let f = flow.clone();
        let waiter = tokio::spawn(async move { f.wait_for_capacity().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        flow.on_acknowledged(&consumer(), 2);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_releases_pause() {
        let flow = Arc::new(FlowController::new(Some((1, 1))));
        flow.register(consumer());
        flow.on_published();
        flow.on_published();

        let f = flow.clone();
        let waiter = tokio::spawn(async move { f.wait_for_capacity().await });
        flow.stop();
        waiter.await.unwrap();
        assert!(!flow.is_paused());
        flow.on_published();
        assert!(!flow.is_paused());
    }
}
