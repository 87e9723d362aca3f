//! # In-process broker.
//!
//! [`LocalBroker`] is a [`Transport`] over one [`tokio::sync::broadcast`] channel per
//! [`Channel`]. Publisher and consumer processes living in the same runtime share one broker.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                      Subscribers (many):
//!   EvaluationPublisher ──┐         ┌──► StatusTracker     (status, filter = evaluation)
//!   StatusTracker ────────┼──► LocalBroker ──► ConsumerProcess (status/evaluation/statistics)
//!   ConsumerProcess ──────┘  (4 broadcast chans) └──► ...
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never waits for receivers.
//! - **Bounded capacity**: each channel keeps at most `capacity` undelivered messages.
//! - **Lag handling**: a slow receiver skips the oldest messages and logs a warning.
//! - **No persistence**: messages sent while nobody subscribes are lost.
//! - **Disconnect**: after [`LocalBroker::disconnect`] every call fails with
//!   [`TransportError::Disconnected`] and open subscriptions end.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::{Filter, Subscription, Transport};
use crate::error::TransportError;
use crate::message::{Channel, Envelope};

/// Broadcast-backed transport for a single process.
///
/// Cheap to clone; clones share the channels.
#[derive(Clone, Debug)]
pub struct LocalBroker {
    channels: [broadcast::Sender<Envelope>; 4],
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl LocalBroker {
    /// Creates a broker whose channels each buffer up to `capacity` messages (min 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            channels: std::array::from_fn(|_| broadcast::channel(capacity).0),
            connected: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Simulates loss of the broker connection.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }

    /// True until [`LocalBroker::disconnect`] is called.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of live receivers on a channel.
    pub fn receiver_count(&self, channel: Channel) -> usize {
        self.channels[channel.index()].receiver_count()
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::Disconnected {
                reason: "local broker disconnected".into(),
            })
        }
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Transport for LocalBroker {
    async fn publish(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.ensure_connected()?;
        trace!(
            target: "evalbus.transport",
            channel = %envelope.channel,
            evaluation_id = %envelope.evaluation_id(),
            "publish"
        );
        let _ = self.channels[envelope.channel.index()].send(envelope);
        Ok(())
    }

    async fn subscribe(&self, channel: Channel, filter: Filter) -> Result<Subscription, TransportError> {
        self.ensure_connected()?;
        let rx = self.channels[channel.index()].subscribe();
        let shutdown = self.shutdown.clone();

        let stream = futures::stream::unfold((rx, filter, shutdown), move |(mut rx, filter, shutdown)| async move {
            loop {
                let received = tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    received = rx.recv() => received,
                };
                match received {
                    Ok(envelope) if filter.matches(&envelope.properties) => {
                        return Some((envelope, (rx, filter, shutdown)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: "evalbus.transport", %channel, skipped, "subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Subscription::new(channel, stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EvaluationId, Properties};

    fn envelope(channel: Channel, evaluation: &str) -> Envelope {
        Envelope::new(
            channel,
            Properties::new(EvaluationId::new(evaluation)),
            b"{}".to_vec(),
        )
    }

    #[tokio::test]
    async fn test_subscription_filters_by_evaluation() {
        let broker = LocalBroker::new(16);
        let mut sub = broker
            .subscribe(Channel::Status, Filter::evaluation(EvaluationId::new("e2")))
            .await
            .unwrap();

        broker.publish(envelope(Channel::Status, "e1")).await.unwrap();
        broker.publish(envelope(Channel::Statistics, "e2")).await.unwrap();
        broker.publish(envelope(Channel::Status, "e2")).await.unwrap();

        let got = sub.recv().await.unwrap();
        assert_eq!(got.channel, Channel::Status);
        assert_eq!(got.evaluation_id().as_str(), "e2");
    }

    #[tokio::test]
    async fn test_disconnect_fails_calls_and_ends_streams() {
        let broker = LocalBroker::default();
        let mut sub = broker
            .subscribe(Channel::Evaluation, Filter::all())
            .await
            .unwrap();

        broker.disconnect();
        assert!(!broker.is_connected());
        assert!(sub.recv().await.is_none());

        let err = broker
            .publish(envelope(Channel::Evaluation, "e1"))
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "transport_disconnected");
        assert!(
            broker
                .subscribe(Channel::Status, Filter::all())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_publish_without_receivers_is_ok() {
        let broker = LocalBroker::new(1);
        assert_eq!(broker.receiver_count(Channel::Pairs), 0);
        broker.publish(envelope(Channel::Pairs, "e1")).await.unwrap();
    }
}
