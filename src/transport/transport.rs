//! # Transport abstraction.
//!
//! evalbus never talks to a broker directly; everything goes through [`Transport`].
//! Connection/session management, durable subscriptions and acknowledgement belong to the
//! implementation. Delivery is expected to be at-least-once.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::error::TransportError;
use crate::message::{Channel, Envelope, EvaluationId, GroupId, Properties};

/// Message selector applied by a subscription.
///
/// An empty filter matches every message on the channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    /// Only messages of this evaluation.
    pub evaluation_id: Option<EvaluationId>,
    /// Only messages of this group.
    pub group_id: Option<GroupId>,
}

impl Filter {
    /// Matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches one evaluation.
    pub fn evaluation(evaluation_id: EvaluationId) -> Self {
        Self {
            evaluation_id: Some(evaluation_id),
            group_id: None,
        }
    }

    /// Narrows the filter to one group.
    #[inline]
    pub fn with_group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// True if a message with these properties passes the filter.
    pub fn matches(&self, props: &Properties) -> bool {
        let evaluation_ok = self
            .evaluation_id
            .as_ref()
            .is_none_or(|id| *id == props.correlation_id);
        let group_ok = self
            .group_id
            .as_ref()
            .is_none_or(|g| props.group_id.as_ref() == Some(g));
        evaluation_ok && group_ok
    }
}

/// Stream of envelopes delivered for one `subscribe` call.
///
/// Ends when the underlying channel closes.
pub struct Subscription {
    channel: Channel,
    inner: BoxStream<'static, Envelope>,
}

impl Subscription {
    /// Wraps a stream of envelopes received on `channel`.
    pub fn new(channel: Channel, stream: impl Stream<Item = Envelope> + Send + 'static) -> Self {
        Self {
            channel,
            inner: stream.boxed(),
        }
    }

    /// Channel this subscription listens on.
    #[inline]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Waits for the next envelope; `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inner.next().await
    }
}

impl Stream for Subscription {
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// # Broker collaborator.
///
/// Implementations must be safe to share between the publisher, its tracker and any number of
/// consumer workers.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use evalbus::{Channel, Envelope, Filter, Subscription, Transport, TransportError};
///
/// struct Blackhole;
///
/// #[async_trait]
/// impl Transport for Blackhole {
///     async fn publish(&self, _envelope: Envelope) -> Result<(), TransportError> {
///         Ok(())
///     }
///
///     async fn subscribe(&self, channel: Channel, _filter: Filter) -> Result<Subscription, TransportError> {
///         Ok(Subscription::new(channel, futures::stream::empty()))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one message.
    ///
    /// Fails with [`TransportError`] on connection loss.
    async fn publish(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Subscribes to a channel; only messages sent after the call are guaranteed to be seen.
    async fn subscribe(&self, channel: Channel, filter: Filter) -> Result<Subscription, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matching() {
        let props = Properties::new(EvaluationId::new("e1")).with_group(Some(GroupId::new("g1")));

        assert!(Filter::all().matches(&props));
        assert!(Filter::evaluation(EvaluationId::new("e1")).matches(&props));
        assert!(!Filter::evaluation(EvaluationId::new("e2")).matches(&props));
        assert!(
            Filter::evaluation(EvaluationId::new("e1"))
                .with_group(GroupId::new("g1"))
                .matches(&props)
        );
        assert!(
            !Filter::evaluation(EvaluationId::new("e1"))
                .with_group(GroupId::new("g2"))
                .matches(&props)
        );

        let ungrouped = Properties::new(EvaluationId::new("e1"));
        assert!(!Filter::all().with_group(GroupId::new("g1")).matches(&ungrouped));
    }
}
