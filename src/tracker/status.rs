//! # Status tracker: negotiation and completion for one evaluation.
//!
//! The tracker subscribes to the status channel of one evaluation and runs a dedicated worker
//! that applies every status event in delivery order:
//!
//! ```text
//! Status channel → StatusTracker.listen()
//!   ├─► READY_TO_CONSUME       → offer book (before close) / liveness (after close)
//!   ├─► CONSUMPTION_ONGOING    → reset consumer latch + flow acknowledgement
//!   ├─► CONSUMPTION_COMPLETE   → count down consumer latch, collect resources
//!   └─► EVALUATION_FAILED      → Failed (fail-fast), collect resources
//! ```
//!
//! ## Rules
//! - Events without a `CONSUMER_ID` property are the publisher's own and are skipped.
//! - Only offers are taken from consumers that were not negotiated.
//! - The first failure wins; later failures are logged only.
//! - State never moves backwards and never leaves a terminal state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::{Failure, TrackerState};
use crate::error::{EvaluationError, NegotiationError, TransportError};
use crate::message::{
    Channel, CompletionStatus, ConsumerId, Envelope, EvaluationId, EvaluationStatus, Format,
    Properties, codec,
};
use crate::negotiation::{Approver, ConsumerOffer, NegotiationResult, OfferBook, OfferOutcome};
use crate::sync::{DeadlineLatch, FlowController};
use crate::transport::{Filter, Subscription, TransportContext};

struct ConsumerTrack {
    latch: Arc<DeadlineLatch>,
    completed: bool,
}

impl ConsumerTrack {
    fn new() -> Self {
        Self {
            latch: Arc::new(DeadlineLatch::new(1)),
            completed: false,
        }
    }
}

struct Shared {
    book: OfferBook,
    consumers: BTreeMap<ConsumerId, ConsumerTrack>,
    failure: Option<Failure>,
    resources: BTreeSet<String>,
}

struct Inner {
    evaluation_id: EvaluationId,
    client_id: String,
    ctx: TransportContext,
    approver: Arc<dyn Approver>,
    flow: Arc<FlowController>,
    negotiation: DeadlineLatch,
    shared: Mutex<Shared>,
    state: watch::Sender<TrackerState>,
    token: CancellationToken,
}

/// Follows the status channel of one evaluation.
pub struct StatusTracker {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StatusTracker {
    /// Subscribes to the evaluation's status events and starts the status worker.
    ///
    /// The subscription exists before this returns, so no offer sent afterwards is missed.
    pub async fn spawn(
        ctx: TransportContext,
        evaluation_id: EvaluationId,
        client_id: impl Into<String>,
        required: BTreeSet<Format>,
        approver: Arc<dyn Approver>,
        flow: Arc<FlowController>,
    ) -> Result<Self, TransportError> {
        let subscription = ctx
            .transport()
            .subscribe(Channel::Status, Filter::evaluation(evaluation_id.clone()))
            .await?;

        let (state, _) = watch::channel(TrackerState::AwaitingNegotiation);
        let inner = Arc::new(Inner {
            evaluation_id,
            client_id: client_id.into(),
            ctx,
            approver,
            flow,
            negotiation: DeadlineLatch::new(1),
            shared: Mutex::new(Shared {
                book: OfferBook::new(required),
                consumers: BTreeMap::new(),
                failure: None,
                resources: BTreeSet::new(),
            }),
            state,
            token: CancellationToken::new(),
        });

        let worker = tokio::spawn(inner.clone().listen(subscription));
        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Evaluation tracked.
    #[inline]
    pub fn evaluation_id(&self) -> &EvaluationId {
        &self.inner.evaluation_id
    }

    /// Current state.
    pub fn state(&self) -> TrackerState {
        *self.inner.state.borrow()
    }

    /// Watch handle over the state, for callers that want to observe transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<TrackerState> {
        self.inner.state.subscribe()
    }

    /// Snapshot of the assignment, once negotiated.
    pub fn negotiated_subscribers(&self) -> Option<NegotiationResult> {
        self.inner.lock().book.result().cloned()
    }

    /// Paths or URIs reported by negotiated consumers on completion or failure.
    pub fn resources_created(&self) -> BTreeSet<String> {
        self.inner.lock().resources.clone()
    }

    /// Waits until every required format has an approved consumer.
    ///
    /// Announces `CONSUMER_REQUIRED` while waiting. The wait times out after
    /// `negotiation_timeout` without an accepted offer; each accepted offer restarts the clock.
    /// Once covered, offers are still collected for `negotiation_window` before the assignment
    /// is fixed.
    pub async fn await_negotiated_subscribers(&self) -> Result<NegotiationResult, EvaluationError> {
        let inner = &self.inner;
        if let Some(result) = self.negotiated_subscribers() {
            return Ok(result);
        }
        inner.check_failure()?;

        let config = inner.ctx.config();
        let covered_already = inner.lock().book.is_covered();
        if !covered_already {
            let timeout = config.negotiation_timeout;
            let covered = tokio::select! {
                covered = inner.negotiation.await_timeout(timeout) => covered,
                err = inner.announce() => return Err(err.into()),
            };
            inner.check_failure()?;
            if !covered {
                let err = NegotiationError::Timeout {
                    timeout,
                    missing: inner.lock().book.missing(),
                };
                inner.fail(Failure::Negotiation(err.clone()));
                return Err(err.into());
            }
            tokio::time::sleep(config.negotiation_window).await;
        }

        let result = {
            let mut shared = inner.lock();
            if let Some(failure) = &shared.failure {
                return Err(failure.to_error(&inner.evaluation_id));
            }
            let Some(result) = shared.book.close().cloned() else {
                return Err(NegotiationError::StreamEnded {
                    missing: shared.book.missing(),
                }
                .into());
            };
            for consumer_id in result.consumers() {
                inner.flow.register(consumer_id.clone());
                shared.consumers.insert(consumer_id, ConsumerTrack::new());
            }
            result
        };

        inner.transition(TrackerState::Negotiated);
        info!(
            target: "evalbus.tracker",
            evaluation_id = %inner.evaluation_id,
            consumers = ?result.consumers(),
            "negotiated"
        );
        Ok(result)
    }

    /// Records that the publisher finalized the evaluation.
    pub fn publication_complete(&self) {
        let inner = &self.inner;
        inner.transition(TrackerState::AwaitingCompletion);
        let shared = inner.lock();
        inner.complete_if_done(&shared);
    }

    /// Fails the evaluation locally and releases any waiter.
    pub fn abandon(&self, reason: impl Into<String>) {
        self.inner.fail(Failure::Stopped {
            reason: reason.into(),
        });
    }

    /// True if the tracker failed because of [`StatusTracker::abandon`].
    pub fn is_stopped(&self) -> bool {
        self.inner
            .lock()
            .failure
            .as_ref()
            .is_some_and(Failure::is_stopped)
    }

    /// Waits until every negotiated consumer reported consumption complete.
    ///
    /// Each consumer may go `consumption_timeout` without progress before the evaluation fails
    /// with [`EvaluationError::ConsumptionTimeout`]. A consumer failure ends the wait
    /// immediately with [`EvaluationError::Failed`].
    pub async fn await_completion(&self) -> Result<(), EvaluationError> {
        let inner = &self.inner;
        let mut state_rx = inner.state.subscribe();

        let tracks: Vec<(ConsumerId, Arc<DeadlineLatch>)> = {
            let shared = inner.lock();
            if let Some(failure) = &shared.failure {
                return Err(failure.to_error(&inner.evaluation_id));
            }
            if !shared.book.is_closed() {
                return Err(EvaluationError::IllegalState {
                    evaluation_id: inner.evaluation_id.clone(),
                    reason: "await completion before negotiation finished".into(),
                });
            }
            shared
                .consumers
                .iter()
                .map(|(id, track)| (id.clone(), track.latch.clone()))
                .collect()
        };

        let timeout = inner.ctx.config().consumption_timeout;
        let waits = futures::future::join_all(tracks.iter().map(|(consumer_id, latch)| async move {
            if latch.await_timeout(timeout).await {
                None
            } else {
                Some(consumer_id.clone())
            }
        }));

        tokio::select! {
            stalled = waits => {
                if let Some(consumer_id) = stalled.into_iter().flatten().next() {
                    inner.fail(Failure::Stalled { consumer_id, timeout });
                }
            }
            _ = async { let _ = state_rx.wait_for(|s| *s == TrackerState::Failed).await; } => {}
        }

        inner.check_failure()?;
        inner.transition(TrackerState::Completed);
        Ok(())
    }

    /// Stops the status worker and waits for it to exit.
    pub async fn shutdown(&self) {
        self.inner.token.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

impl Drop for StatusTracker {
    fn drop(&mut self) {
        self.inner.token.cancel();
    }
}

impl std::fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTracker")
            .field("evaluation_id", &self.inner.evaluation_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn listen(self: Arc<Self>, mut subscription: Subscription) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                envelope = subscription.recv() => match envelope {
                    Some(envelope) => self.handle(&envelope),
                    None => {
                        debug!(target: "evalbus.tracker", evaluation_id = %self.evaluation_id, "status subscription ended");
                        break;
                    }
                }
            }
        }
    }

    fn handle(&self, envelope: &Envelope) {
        let Some(consumer_id) = envelope.properties.consumer_id.as_ref() else {
            return;
        };
        let status: EvaluationStatus = match codec::decode(&envelope.payload) {
            Ok(status) => status,
            Err(e) => {
                warn!(target: "evalbus.tracker", evaluation_id = %self.evaluation_id, %consumer_id, error = %e, "undecodable status");
                return;
            }
        };

        match status.completion_status {
            CompletionStatus::ReadyToConsume => self.on_offer(consumer_id, &status),
            CompletionStatus::ConsumptionOngoing => {
                self.on_progress(consumer_id, status.message_count)
            }
            CompletionStatus::ConsumptionCompleteReportedSuccess => {
                self.on_consumer_complete(consumer_id, status.message_count, status.resources_created)
            }
            CompletionStatus::EvaluationFailed => {
                let reason = status
                    .reason
                    .unwrap_or_else(|| "consumer reported failure".to_string());
                self.on_consumer_failed(consumer_id, reason, status.resources_created);
            }
            CompletionStatus::GroupConsumptionComplete => {
                debug!(
                    target: "evalbus.tracker",
                    evaluation_id = %self.evaluation_id,
                    %consumer_id,
                    group_id = ?envelope.properties.group_id,
                    "group consumed"
                );
            }
            _ => {}
        }
    }

    fn on_offer(&self, consumer_id: &ConsumerId, status: &EvaluationStatus) {
        let mut shared = self.lock();
        if shared.book.is_closed() {
            if let Some(track) = shared.consumers.get(consumer_id) {
                track.latch.reset_clock();
            }
            return;
        }

        let Some(offer) = ConsumerOffer::from_status(status) else {
            return;
        };
        let outcome = shared.book.register(&offer, self.approver.as_ref());
        debug!(
            target: "evalbus.tracker",
            evaluation_id = %self.evaluation_id,
            consumer_id = %offer.consumer_id,
            ?outcome,
            "offer"
        );
        if outcome.is_accepted() {
            self.negotiation.reset_clock();
        }
        if outcome == OfferOutcome::Covered {
            self.negotiation.count_down();
        }
    }

    fn on_progress(&self, consumer_id: &ConsumerId, consumed: Option<u64>) {
        {
            let shared = self.lock();
            let Some(track) = shared.consumers.get(consumer_id) else {
                return;
            };
            track.latch.reset_clock();
        }
        if let Some(consumed) = consumed {
            self.flow.on_acknowledged(consumer_id, consumed);
        }
    }

    fn on_consumer_complete(&self, consumer_id: &ConsumerId, consumed: Option<u64>, resources: Vec<String>) {
        if let Some(consumed) = consumed {
            self.flow.on_acknowledged(consumer_id, consumed);
        }
        let mut shared = self.lock();
        let Some(track) = shared.consumers.get_mut(consumer_id) else {
            return;
        };
        if track.completed {
            return;
        }
        track.completed = true;
        let latch = track.latch.clone();
        info!(
            target: "evalbus.tracker",
            evaluation_id = %self.evaluation_id,
            %consumer_id,
            consumed = ?consumed,
            resources = resources.len(),
            "consumer complete"
        );
        shared.resources.extend(resources);
        latch.count_down();
        self.complete_if_done(&shared);
    }

    fn on_consumer_failed(&self, consumer_id: &ConsumerId, reason: String, resources: Vec<String>) {
        {
            let mut shared = self.lock();
            if !shared.consumers.contains_key(consumer_id) {
                debug!(target: "evalbus.tracker", evaluation_id = %self.evaluation_id, %consumer_id, "failure from non-negotiated consumer ignored");
                return;
            }
            shared.resources.extend(resources);
        }
        self.fail(Failure::Consumer {
            consumer_id: consumer_id.clone(),
            reason,
        });
    }

    fn complete_if_done(&self, shared: &Shared) {
        if *self.state.borrow() != TrackerState::AwaitingCompletion {
            return;
        }
        if shared.failure.is_none() && shared.consumers.values().all(|t| t.completed) {
            self.transition(TrackerState::Completed);
        }
    }

    fn fail(&self, failure: Failure) {
        {
            let mut shared = self.lock();
            if shared.failure.is_some() || self.state.borrow().is_terminal() {
                debug!(target: "evalbus.tracker", evaluation_id = %self.evaluation_id, ?failure, "failure after terminal state ignored");
                return;
            }
            if failure.is_stopped() {
                info!(target: "evalbus.tracker", evaluation_id = %self.evaluation_id, ?failure, "evaluation stopped");
            } else {
                error!(target: "evalbus.tracker", evaluation_id = %self.evaluation_id, ?failure, "evaluation failed");
            }
            shared.failure = Some(failure);
        }
        self.transition(TrackerState::Failed);
        self.flow.stop();
        self.negotiation.count_down();
    }

    fn check_failure(&self) -> Result<(), EvaluationError> {
        match &self.lock().failure {
            Some(failure) => Err(failure.to_error(&self.evaluation_id)),
            None => Ok(()),
        }
    }

    fn transition(&self, to: TrackerState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state >= to {
                return false;
            }
            debug!(target: "evalbus.tracker", evaluation_id = %self.evaluation_id, from = state.as_str(), to = to.as_str(), "transition");
            *state = to;
            true
        })
    }

    /// Sends `CONSUMER_REQUIRED` now and then once per interval; returns only on error.
    async fn announce(&self) -> TransportError {
        let interval = self.ctx.config().announce_interval();
        loop {
            let required = self.lock().book.missing();
            let status = EvaluationStatus::new(CompletionStatus::ConsumerRequired, self.client_id.as_str())
                .with_formats_required(required);
            if let Err(err) = self
                .ctx
                .send_status(Properties::new(self.evaluation_id.clone()), &status)
                .await
            {
                return err;
            }
            match interval {
                Some(period) => tokio::time::sleep(period).await,
                None => std::future::pending::<()>().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::message::ConsumerDescription;
    use crate::negotiation::ApproveAll;

    fn config() -> Config {
        Config {
            negotiation_timeout: Duration::from_secs(10),
            negotiation_window: Duration::from_millis(10),
            consumer_required_interval: Duration::from_millis(100),
            consumption_timeout: Duration::from_secs(30),
            ..Config::default()
        }
    }

    async fn tracker(ctx: &TransportContext, formats: &[Format]) -> StatusTracker {
        StatusTracker::spawn(
            ctx.clone(),
            EvaluationId::new("e1"),
            "publisher",
            formats.iter().copied().collect(),
            Arc::new(ApproveAll),
            Arc::new(FlowController::disabled()),
        )
        .await
        .unwrap()
    }

    async fn send(ctx: &TransportContext, consumer: &str, status: EvaluationStatus) {
        let props = Properties::new(EvaluationId::new("e1")).with_consumer(ConsumerId::new(consumer));
        ctx.send_status(props, &status).await.unwrap();
    }

    fn offer(consumer: &str, formats: &[Format]) -> EvaluationStatus {
        EvaluationStatus::new(CompletionStatus::ReadyToConsume, "host").with_consumer(
            ConsumerDescription::new(ConsumerId::new(consumer), formats.iter().copied()),
        )
    }

    fn status(kind: CompletionStatus) -> EvaluationStatus {
        EvaluationStatus::new(kind, "host")
    }

    #[tokio::test(start_paused = true)]
    async fn test_negotiates_and_completes() {
        let ctx = TransportContext::local(config());
        let tracker = tracker(&ctx, &[Format::Png]).await;

        let c = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            send(&c, "c1", offer("c1", &[Format::Png])).await;
        });

        let result = tracker.await_negotiated_subscribers().await.unwrap();
        assert_eq!(result.get(Format::Png).map(|c| c.as_str()), Some("c1"));
        assert_eq!(tracker.state(), TrackerState::Negotiated);

        tracker.publication_complete();
        assert_eq!(tracker.state(), TrackerState::AwaitingCompletion);
        send(
            &ctx,
            "c1",
            status(CompletionStatus::ConsumptionCompleteReportedSuccess).with_message_count(0),
        )
        .await;
        tracker.await_completion().await.unwrap();
        assert_eq!(tracker.state(), TrackerState::Completed);
        tracker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_collects_resources_from_negotiated_consumers_only() {
        let ctx = TransportContext::local(config());
        let tracker = tracker(&ctx, &[Format::Png, Format::Csv]).await;

        let c = ctx.clone();
        tokio::spawn(async move {
            send(&c, "img", offer("img", &[Format::Png])).await;
            send(&c, "tab", offer("tab", &[Format::Csv])).await;
        });
        tracker.await_negotiated_subscribers().await.unwrap();
        tracker.publication_complete();

        fn done(paths: &[&str]) -> EvaluationStatus {
            status(CompletionStatus::ConsumptionCompleteReportedSuccess)
                .with_message_count(1)
                .with_resources_created(paths.iter().map(|p| p.to_string()))
        }
        send(&ctx, "stranger", done(&["elsewhere/x.csv"])).await;
        send(&ctx, "img", done(&["out/e1.png"])).await;
        send(&ctx, "tab", done(&["out/e1.csv", "out/e1.png"])).await;
        tracker.await_completion().await.unwrap();

        let resources: Vec<String> = tracker.resources_created().into_iter().collect();
        assert_eq!(resources, vec!["out/e1.csv", "out/e1.png"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negotiation_timeout_fails_tracker() {
        let ctx = TransportContext::local(config());
        let tracker = tracker(&ctx, &[Format::Netcdf]).await;

        let err = tracker.await_negotiated_subscribers().await.unwrap_err();
        assert_eq!(err.as_label(), "negotiation_timeout");
        assert_eq!(tracker.state(), TrackerState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumer_failure_is_fail_fast() {
        let ctx = TransportContext::local(config());
        let tracker = tracker(&ctx, &[Format::Png, Format::Csv]).await;

        let c = ctx.clone();
        tokio::spawn(async move {
            send(&c, "img", offer("img", &[Format::Png])).await;
            send(&c, "tab", offer("tab", &[Format::Csv])).await;
        });
        tracker.await_negotiated_subscribers().await.unwrap();
        tracker.publication_complete();

        send(
            &ctx,
            "tab",
            status(CompletionStatus::EvaluationFailed).with_reason("disk full"),
        )
        .await;
        let err = tracker.await_completion().await.unwrap_err();
        match err {
            EvaluationError::Failed { consumers, reason, .. } => {
                assert_eq!(consumers, vec![ConsumerId::new("tab")]);
                assert_eq!(reason, "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_from_unknown_consumer_is_ignored() {
        let ctx = TransportContext::local(config());
        let tracker = tracker(&ctx, &[Format::Png]).await;

        let c = ctx.clone();
        tokio::spawn(async move { send(&c, "c1", offer("c1", &[Format::Png])).await });
        tracker.await_negotiated_subscribers().await.unwrap();

        send(&ctx, "stranger", status(CompletionStatus::EvaluationFailed)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(tracker.state(), TrackerState::Negotiated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_consumer_times_out_but_heartbeats_keep_it_alive() {
        let ctx = TransportContext::local(config());
        let tracker = tracker(&ctx, &[Format::Png]).await;

        let c = ctx.clone();
        tokio::spawn(async move { send(&c, "c1", offer("c1", &[Format::Png])).await });
        tracker.await_negotiated_subscribers().await.unwrap();
        tracker.publication_complete();

        let c = ctx.clone();
        tokio::spawn(async move {
            // Three heartbeats 20s apart, then silence: 60s of progress with a 30s timeout.
            for n in 1..=3 {
                tokio::time::sleep(Duration::from_secs(20)).await;
                send(
                    &c,
                    "c1",
                    status(CompletionStatus::ConsumptionOngoing).with_message_count(n),
                )
                .await;
            }
        });

        let start = tokio::time::Instant::now();
        let err = tracker.await_completion().await.unwrap_err();
        assert_eq!(err.as_label(), "evaluation_consumption_timeout");
        assert!(start.elapsed() >= Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_releases_negotiation_wait() {
        let ctx = TransportContext::local(config());
        let tracker = Arc::new(tracker(&ctx, &[Format::Png]).await);

        let t = tracker.clone();
        let waiter = tokio::spawn(async move { t.await_negotiated_subscribers().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tracker.abandon("operator");

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.as_label(), "evaluation_failed");
        assert!(tracker.is_stopped());
    }

    #[tokio::test]
    async fn test_empty_requirement_negotiates_without_offers() {
        let ctx = TransportContext::local(Config {
            negotiation_window: Duration::ZERO,
            ..config()
        });
        let tracker = tracker(&ctx, &[]).await;
        let result = tracker.await_negotiated_subscribers().await.unwrap();
        assert!(result.is_empty());

        tracker.publication_complete();
        assert_eq!(tracker.state(), TrackerState::Completed);
        tracker.await_completion().await.unwrap();
    }
}
