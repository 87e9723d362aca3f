//! # Evaluation publisher: the single owner of one evaluation.
//!
//! ```text
//! Created ──start()──► Starting ──negotiated + description sent──► Publishing
//!                                                                      │
//!   publish() / publish_pairs() / mark_group_publication_complete_*() ◄┘
//!                                                                      │
//!                              mark_publication_complete_reported_success()
//!                                                                      ▼
//!                                                            PublicationComplete
//!
//! any phase ──stop(cause)──► Stopped          any phase ──close()──► Closed
//! ```
//!
//! ## Rules
//! - `start` runs once; `publish*` only while `Publishing`.
//! - A group is finalized at most once; finalizing an unknown group finalizes an empty group.
//! - Publication cannot complete while a started group is still open.
//! - Serialization failures are returned to the caller and change nothing.
//! - `stop` and `close` are idempotent.
//! - Consumer failures only surface through [`EvaluationPublisher::await_completion`].

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::PublisherBuilder;
use crate::error::EvaluationError;
use crate::message::{
    Channel, CompletionStatus, Envelope, EvaluationDescription, EvaluationId, EvaluationStatus,
    GroupId, Properties, codec,
};
use crate::negotiation::NegotiationResult;
use crate::sync::FlowController;
use crate::tracker::StatusTracker;
use crate::transport::TransportContext;

/// Lifecycle phase of a publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublisherPhase {
    /// Built, not started.
    Created,
    /// Negotiating consumers.
    Starting,
    /// Accepting statistics.
    Publishing,
    /// Publication finalized; only awaiting remains.
    PublicationComplete,
    /// Stopped locally.
    Stopped,
    /// Resources released.
    Closed,
}

impl PublisherPhase {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PublisherPhase::Created => "created",
            PublisherPhase::Starting => "starting",
            PublisherPhase::Publishing => "publishing",
            PublisherPhase::PublicationComplete => "publication_complete",
            PublisherPhase::Stopped => "stopped",
            PublisherPhase::Closed => "closed",
        }
    }
}

/// Messages sent so far by one publisher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublicationCounts {
    /// Statistics messages.
    pub statistics: u64,
    /// Distinct groups (published into or finalized).
    pub groups: u64,
    /// Pairs messages.
    pub pairs: u64,
    /// Status events (milestones and stop).
    pub status: u64,
}

#[derive(Debug, Default)]
struct GroupCount {
    published: u64,
    complete: bool,
}

#[derive(Debug, Default)]
struct Counters {
    statistics: AtomicU64,
    groups: AtomicU64,
    pairs: AtomicU64,
    status: AtomicU64,
}

/// Publishes one evaluation and follows it to completion.
///
/// # Example
/// ```no_run
/// use evalbus::{Config, EvaluationDescription, EvaluationPublisher, Format, TransportContext};
///
/// # async fn run() -> Result<(), evalbus::EvaluationError> {
/// let ctx = TransportContext::local(Config::default());
/// let publisher = EvaluationPublisher::builder(ctx, EvaluationDescription::new([Format::Csv]))
///     .with_client_id("ensemble-run-7")
///     .build()
///     .await?;
///
/// publisher.start().await?;
/// publisher.publish(&vec![0.25_f64, 0.5], None).await?;
/// publisher.mark_publication_complete_reported_success().await?;
/// let code = publisher.await_completion().await?;
/// publisher.close().await;
/// assert_eq!(code, 0);
/// # Ok(())
/// # }
/// ```
pub struct EvaluationPublisher {
    ctx: TransportContext,
    evaluation_id: EvaluationId,
    client_id: String,
    description: EvaluationDescription,
    tracker: StatusTracker,
    flow: Arc<FlowController>,
    phase: Mutex<PublisherPhase>,
    negotiated: OnceLock<NegotiationResult>,
    groups: Mutex<HashMap<GroupId, GroupCount>>,
    counters: Counters,
}

impl EvaluationPublisher {
    /// Starts building a publisher for the given description.
    pub fn builder(ctx: TransportContext, description: EvaluationDescription) -> PublisherBuilder {
        PublisherBuilder::new(ctx, description)
    }

    pub(super) fn new_internal(
        ctx: TransportContext,
        evaluation_id: EvaluationId,
        client_id: String,
        description: EvaluationDescription,
        tracker: StatusTracker,
        flow: Arc<FlowController>,
    ) -> Self {
        Self {
            ctx,
            evaluation_id,
            client_id,
            description,
            tracker,
            flow,
            phase: Mutex::new(PublisherPhase::Created),
            negotiated: OnceLock::new(),
            groups: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Evaluation id carried by every message.
    #[inline]
    pub fn evaluation_id(&self) -> &EvaluationId {
        &self.evaluation_id
    }

    /// Client id reported in status events.
    #[inline]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Published description.
    #[inline]
    pub fn description(&self) -> &EvaluationDescription {
        &self.description
    }

    /// Current phase.
    pub fn phase(&self) -> PublisherPhase {
        *self.lock_phase()
    }

    /// Assignment negotiated by [`EvaluationPublisher::start`].
    pub fn negotiated(&self) -> Option<&NegotiationResult> {
        self.negotiated.get()
    }

    /// The status tracker following this evaluation.
    #[inline]
    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    /// Messages sent so far.
    pub fn counts(&self) -> PublicationCounts {
        PublicationCounts {
            statistics: self.counters.statistics.load(Ordering::SeqCst),
            groups: self.counters.groups.load(Ordering::SeqCst),
            pairs: self.counters.pairs.load(Ordering::SeqCst),
            status: self.counters.status.load(Ordering::SeqCst),
        }
    }

    /// Paths or URIs the negotiated consumers reported writing.
    ///
    /// Complete once [`EvaluationPublisher::await_completion`] returned.
    pub fn resources_created(&self) -> BTreeSet<String> {
        self.tracker.resources_created()
    }

    /// Negotiates consumers, then publishes the description once.
    ///
    /// Returns the negotiated assignment. Calling `start` a second time is illegal.
    pub async fn start(&self) -> Result<NegotiationResult, EvaluationError> {
        let payload = codec::encode(&self.description).map_err(|source| {
            EvaluationError::Serialization {
                what: "description",
                source,
            }
        })?;
        self.advance(PublisherPhase::Created, PublisherPhase::Starting, "start")?;

        let result = match self.tracker.await_negotiated_subscribers().await {
            Ok(result) => result,
            Err(e) => {
                warn!(target: "evalbus.publisher", evaluation_id = %self.evaluation_id, error = %e, "negotiation failed");
                let _ = self.advance(PublisherPhase::Starting, PublisherPhase::Stopped, "start");
                return Err(e);
            }
        };
        let _ = self.negotiated.set(result.clone());

        self.ctx
            .transport()
            .publish(Envelope::new(Channel::Evaluation, self.properties(None), payload))
            .await?;
        self.advance(PublisherPhase::Starting, PublisherPhase::Publishing, "start")?;

        info!(
            target: "evalbus.publisher",
            evaluation_id = %self.evaluation_id,
            formats = ?self.description.formats,
            consumers = result.consumers().len(),
            "evaluation started"
        );
        Ok(result)
    }

    /// Sends one statistics message, optionally as part of a group.
    ///
    /// Waits while flow control is paused. Fails with
    /// [`EvaluationError::Serialization`] if `statistics` cannot be encoded and with
    /// [`EvaluationError::IllegalState`] outside the publishing phase or for a finalized group.
    pub async fn publish<S>(&self, statistics: &S, group: Option<&GroupId>) -> Result<(), EvaluationError>
    where
        S: Serialize + ?Sized,
    {
        self.ensure_publishing("publish")?;
        let payload = codec::encode(statistics).map_err(|source| EvaluationError::Serialization {
            what: "statistics",
            source,
        })?;
        if let Some(group) = group {
            self.ensure_group_open(group)?;
        }

        self.flow.wait_for_capacity().await;
        self.ensure_publishing("publish")?;
        // The group may have been finalized during the pause.
        if let Some(group) = group {
            self.reserve(group)?;
        }

        let sent = self
            .ctx
            .transport()
            .publish(Envelope::new(
                Channel::Statistics,
                self.properties(group.cloned()),
                payload,
            ))
            .await;
        if let Err(e) = sent {
            if let Some(group) = group {
                self.release(group);
            }
            return Err(e.into());
        }

        self.counters.statistics.fetch_add(1, Ordering::SeqCst);
        self.flow.on_published();
        Ok(())
    }

    /// Sends one pairs message on the pairs channel.
    ///
    /// Pairs are counted separately and do not take part in consumer completion.
    pub async fn publish_pairs<S>(&self, pairs: &S, group: Option<&GroupId>) -> Result<(), EvaluationError>
    where
        S: Serialize + ?Sized,
    {
        self.ensure_publishing("publish pairs")?;
        let payload = codec::encode(pairs).map_err(|source| EvaluationError::Serialization {
            what: "pairs",
            source,
        })?;
        self.ctx
            .transport()
            .publish(Envelope::new(
                Channel::Pairs,
                self.properties(group.cloned()),
                payload,
            ))
            .await?;
        self.counters.pairs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Finalizes a group and announces how many statistics it holds.
    pub async fn mark_group_publication_complete_reported_success(
        &self,
        group: &GroupId,
    ) -> Result<(), EvaluationError> {
        self.ensure_publishing("mark group complete")?;
        let count = {
            let mut groups = self.lock_groups();
            let entry = groups.entry(group.clone()).or_insert_with(|| {
                self.counters.groups.fetch_add(1, Ordering::SeqCst);
                GroupCount::default()
            });
            if entry.complete {
                return Err(self.illegal(format!("group {group} already finalized")));
            }
            entry.complete = true;
            entry.published
        };

        let status = EvaluationStatus::new(
            CompletionStatus::GroupCompleteReportedSuccess,
            self.client_id.as_str(),
        )
        .with_message_count(count);
        self.send_status(Some(group.clone()), &status).await?;
        debug!(target: "evalbus.publisher", evaluation_id = %self.evaluation_id, group_id = %group, count, "group complete");
        Ok(())
    }

    /// Finalizes the evaluation and announces the message, group and pairs counts.
    ///
    /// Required even when nothing was published.
    pub async fn mark_publication_complete_reported_success(&self) -> Result<(), EvaluationError> {
        self.ensure_publishing("mark publication complete")?;
        {
            let groups = self.lock_groups();
            let mut open: Vec<&str> = groups
                .iter()
                .filter(|(_, c)| !c.complete)
                .map(|(g, _)| g.as_str())
                .collect();
            if !open.is_empty() {
                open.sort_unstable();
                return Err(self.illegal(format!("groups still open: {}", open.join(", "))));
            }
        }
        self.advance(
            PublisherPhase::Publishing,
            PublisherPhase::PublicationComplete,
            "mark publication complete",
        )?;

        let counts = self.counts();
        let status = EvaluationStatus::new(
            CompletionStatus::PublicationCompleteReportedSuccess,
            self.client_id.as_str(),
        )
        .with_message_count(counts.statistics)
        .with_group_count(counts.groups)
        .with_pairs_count(counts.pairs);
        self.send_status(None, &status).await?;
        self.tracker.publication_complete();

        info!(
            target: "evalbus.publisher",
            evaluation_id = %self.evaluation_id,
            statistics = counts.statistics,
            groups = counts.groups,
            pairs = counts.pairs,
            "publication complete"
        );
        Ok(())
    }

    /// Terminates the evaluation locally.
    ///
    /// Later `publish` calls fail; consumers are told with `PUBLICATION_STOPPED`. Calling
    /// `stop` again, or after `close`, does nothing.
    pub async fn stop(&self, cause: impl Into<String>) -> Result<(), EvaluationError> {
        let cause = cause.into();
        {
            let mut phase = self.lock_phase();
            if matches!(*phase, PublisherPhase::Stopped | PublisherPhase::Closed) {
                return Ok(());
            }
            *phase = PublisherPhase::Stopped;
        }
        warn!(target: "evalbus.publisher", evaluation_id = %self.evaluation_id, %cause, "evaluation stopped");

        self.flow.stop();
        self.tracker.abandon(cause.clone());
        let status = EvaluationStatus::new(CompletionStatus::PublicationStopped, self.client_id.as_str())
            .with_reason(cause);
        self.send_status(None, &status).await?;
        Ok(())
    }

    /// True if [`EvaluationPublisher::stop`] ended the evaluation before it reached a
    /// terminal state.
    pub fn is_stopped(&self) -> bool {
        self.tracker.is_stopped()
    }

    /// Waits for every negotiated consumer to finish.
    ///
    /// Returns `Ok(0)` when all consumers completed and `Ok(1)` when the evaluation was
    /// stopped locally. A consumer failure, a stalled consumer or a failed negotiation is
    /// returned as the error.
    pub async fn await_completion(&self) -> Result<i32, EvaluationError> {
        if self.phase() == PublisherPhase::Created {
            return Err(self.illegal("await completion before start".to_string()));
        }
        if self.is_stopped() {
            return Ok(1);
        }
        match self.tracker.await_completion().await {
            Ok(()) => {
                info!(target: "evalbus.publisher", evaluation_id = %self.evaluation_id, "evaluation complete");
                Ok(0)
            }
            Err(_) if self.is_stopped() => Ok(1),
            Err(e) => {
                warn!(target: "evalbus.publisher", evaluation_id = %self.evaluation_id, error = %e, label = e.as_label(), "evaluation did not complete");
                Err(e)
            }
        }
    }

    /// Releases the status subscription and worker. Idempotent.
    pub async fn close(&self) {
        {
            let mut phase = self.lock_phase();
            if *phase == PublisherPhase::Closed {
                return;
            }
            *phase = PublisherPhase::Closed;
        }
        self.flow.stop();
        self.tracker.shutdown().await;
        debug!(target: "evalbus.publisher", evaluation_id = %self.evaluation_id, "closed");
    }

    fn lock_phase(&self) -> MutexGuard<'_, PublisherPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_groups(&self) -> MutexGuard<'_, HashMap<GroupId, GroupCount>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn illegal(&self, reason: String) -> EvaluationError {
        EvaluationError::IllegalState {
            evaluation_id: self.evaluation_id.clone(),
            reason,
        }
    }

    fn advance(&self, from: PublisherPhase, to: PublisherPhase, op: &str) -> Result<(), EvaluationError> {
        let mut phase = self.lock_phase();
        if *phase != from {
            let current = *phase;
            drop(phase);
            return Err(self.illegal(format!("{op} while {}", current.as_str())));
        }
        *phase = to;
        Ok(())
    }

    fn ensure_publishing(&self, op: &str) -> Result<(), EvaluationError> {
        let phase = self.phase();
        if phase == PublisherPhase::Publishing {
            Ok(())
        } else {
            Err(self.illegal(format!("{op} while {}", phase.as_str())))
        }
    }

    fn ensure_group_open(&self, group: &GroupId) -> Result<(), EvaluationError> {
        let complete = self
            .lock_groups()
            .get(group)
            .is_some_and(|c| c.complete);
        if complete {
            Err(self.illegal(format!("publish into finalized group {group}")))
        } else {
            Ok(())
        }
    }

    /// Counts one message into an open group before it is sent.
    fn reserve(&self, group: &GroupId) -> Result<(), EvaluationError> {
        let mut groups = self.lock_groups();
        let count = groups.entry(group.clone()).or_insert_with(|| {
            self.counters.groups.fetch_add(1, Ordering::SeqCst);
            GroupCount::default()
        });
        if count.complete {
            return Err(self.illegal(format!("publish into finalized group {group}")));
        }
        count.published += 1;
        Ok(())
    }

    /// Undoes a reservation whose message was never sent.
    fn release(&self, group: &GroupId) {
        if let Some(count) = self.lock_groups().get_mut(group) {
            if !count.complete {
                count.published = count.published.saturating_sub(1);
            }
        }
    }

    fn properties(&self, group: Option<GroupId>) -> Properties {
        let routing = self
            .negotiated
            .get()
            .map(|r| r.as_map().clone())
            .unwrap_or_default();
        Properties::new(self.evaluation_id.clone())
            .with_group(group)
            .with_routing(routing)
    }

    async fn send_status(&self, group: Option<GroupId>, status: &EvaluationStatus) -> Result<(), EvaluationError> {
        self.ctx
            .send_status(
                Properties::new(self.evaluation_id.clone()).with_group(group),
                status,
            )
            .await?;
        self.counters.status.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for EvaluationPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationPublisher")
            .field("evaluation_id", &self.evaluation_id)
            .field("phase", &self.phase())
            .field("counts", &self.counts())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::message::{ConsumerDescription, ConsumerId, Format};
    use crate::transport::Filter;
    use std::time::Duration;

    struct NotJson;

    impl Serialize for NotJson {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not encodable"))
        }
    }

    fn config() -> Config {
        Config {
            negotiation_window: Duration::ZERO,
            ..Config::default()
        }
    }

    /// Publisher without required formats: negotiation completes immediately.
    async fn started() -> EvaluationPublisher {
        let ctx = TransportContext::local(config());
        let publisher = EvaluationPublisher::builder(ctx, EvaluationDescription::default())
            .with_evaluation_id("e1")
            .build()
            .await
            .unwrap();
        publisher.start().await.unwrap();
        publisher
    }

    #[tokio::test]
    async fn test_zero_statistics_completes_with_zero() {
        let publisher = started().await;
        publisher
            .mark_publication_complete_reported_success()
            .await
            .unwrap();
        assert_eq!(publisher.await_completion().await.unwrap(), 0);
        assert_eq!(publisher.counts().status, 1);
        publisher.close().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_illegal() {
        let publisher = started().await;
        let err = publisher.start().await.unwrap_err();
        assert_eq!(err.as_label(), "evaluation_illegal_state");
    }

    #[tokio::test]
    async fn test_publish_before_start_and_after_stop_is_illegal() {
        let ctx = TransportContext::local(config());
        let publisher = EvaluationPublisher::builder(ctx, EvaluationDescription::default())
            .build()
            .await
            .unwrap();
        let err = publisher.publish(&1_u32, None).await.unwrap_err();
        assert_eq!(err.as_label(), "evaluation_illegal_state");

        publisher.start().await.unwrap();
        publisher.publish(&1_u32, None).await.unwrap();
        publisher.stop("operator").await.unwrap();
        publisher.stop("again").await.unwrap();
        assert_eq!(publisher.phase(), PublisherPhase::Stopped);

        let err = publisher.publish(&2_u32, None).await.unwrap_err();
        assert_eq!(err.as_label(), "evaluation_illegal_state");
        assert_eq!(publisher.await_completion().await.unwrap(), 1);
        assert_eq!(publisher.counts().statistics, 1);
    }

    #[tokio::test]
    async fn test_publish_after_complete_is_illegal() {
        let publisher = started().await;
        publisher
            .mark_publication_complete_reported_success()
            .await
            .unwrap();
        assert!(publisher.publish(&1_u32, None).await.is_err());
        assert!(
            publisher
                .mark_publication_complete_reported_success()
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_serialization_failure_leaves_publisher_usable() {
        let publisher = started().await;
        let err = publisher.publish(&NotJson, None).await.unwrap_err();
        assert_eq!(err.as_label(), "evaluation_serialization");
        assert_eq!(publisher.phase(), PublisherPhase::Publishing);

        publisher.publish(&[1.0_f64, 2.0], None).await.unwrap();
        assert_eq!(publisher.counts().statistics, 1);
    }

    #[tokio::test]
    async fn test_group_rules() {
        let publisher = started().await;
        let g1 = GroupId::new("g1");
        publisher.publish(&1_u32, Some(&g1)).await.unwrap();

        let err = publisher
            .mark_publication_complete_reported_success()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("g1"));

        publisher
            .mark_group_publication_complete_reported_success(&g1)
            .await
            .unwrap();
        assert!(
            publisher
                .mark_group_publication_complete_reported_success(&g1)
                .await
                .is_err()
        );
        assert!(publisher.publish(&2_u32, Some(&g1)).await.is_err());

        // Unknown group: an empty group.
        publisher
            .mark_group_publication_complete_reported_success(&GroupId::new("empty"))
            .await
            .unwrap();
        publisher
            .mark_publication_complete_reported_success()
            .await
            .unwrap();

        let counts = publisher.counts();
        assert_eq!(counts.statistics, 1);
        assert_eq!(counts.groups, 2);
        assert_eq!(counts.status, 3);
    }

    #[tokio::test]
    async fn test_pairs_are_counted_apart_from_statistics() {
        let publisher = started().await;
        let transport = publisher.ctx.transport().clone();
        let mut pairs = transport
            .subscribe(Channel::Pairs, Filter::evaluation(EvaluationId::new("e1")))
            .await
            .unwrap();
        let mut status = transport
            .subscribe(Channel::Status, Filter::evaluation(EvaluationId::new("e1")))
            .await
            .unwrap();

        let g = GroupId::new("g1");
        publisher.publish_pairs(&[(1.0_f64, 1.5_f64)], Some(&g)).await.unwrap();
        publisher.publish_pairs(&[(2.0_f64, 2.5_f64)], None).await.unwrap();
        publisher.publish(&7_u32, None).await.unwrap();
        assert_eq!(
            publisher.publish_pairs(&NotJson, None).await.unwrap_err().as_label(),
            "evaluation_serialization"
        );

        let first = pairs.recv().await.unwrap();
        assert_eq!(first.channel, Channel::Pairs);
        assert_eq!(first.properties.group_id, Some(g));
        let decoded: Vec<(f64, f64)> = codec::decode(&first.payload).unwrap();
        assert_eq!(decoded, vec![(1.0, 1.5)]);

        // Pairs never open a group.
        publisher
            .mark_publication_complete_reported_success()
            .await
            .unwrap();
        let counts = publisher.counts();
        assert_eq!((counts.statistics, counts.pairs, counts.groups), (1, 2, 0));

        let envelope = status.recv().await.unwrap();
        let complete: EvaluationStatus = codec::decode(&envelope.payload).unwrap();
        assert_eq!(
            complete.completion_status,
            CompletionStatus::PublicationCompleteReportedSuccess
        );
        assert_eq!(complete.message_count, Some(1));
        assert_eq!(complete.pairs_count, Some(2));
        assert_eq!(complete.group_count, Some(0));
        assert!(publisher.publish_pairs(&1_u32, None).await.is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let publisher = started().await;
        publisher.close().await;
        publisher.close().await;
        assert_eq!(publisher.phase(), PublisherPhase::Closed);
        assert!(publisher.publish(&1_u32, None).await.is_err());
    }

    #[tokio::test]
    async fn test_messages_carry_routing_after_negotiation() {
        let ctx = TransportContext::local(config());
        let publisher = EvaluationPublisher::builder(ctx.clone(), EvaluationDescription::new([Format::Png]))
            .with_evaluation_id("e1")
            .build()
            .await
            .unwrap();
        let mut statistics = ctx
            .transport()
            .subscribe(Channel::Statistics, Filter::evaluation(EvaluationId::new("e1")))
            .await
            .unwrap();

        let c = ctx.clone();
        tokio::spawn(async move {
            let offer = EvaluationStatus::new(CompletionStatus::ReadyToConsume, "host")
                .with_consumer(ConsumerDescription::new(ConsumerId::new("img"), [Format::Png]));
            let props = Properties::new(EvaluationId::new("e1")).with_consumer(ConsumerId::new("img"));
            c.send_status(props, &offer).await.unwrap();
        });

        let result = publisher.start().await.unwrap();
        assert_eq!(result.get(Format::Png).map(|c| c.as_str()), Some("img"));

        publisher.publish(&1_u32, None).await.unwrap();
        let envelope = statistics.recv().await.unwrap();
        assert!(envelope.properties.is_addressed_to(&ConsumerId::new("img")));
        assert_eq!(
            envelope.properties.routing.get(&Format::Png).map(|c| c.as_str()),
            Some("img")
        );
    }
}
