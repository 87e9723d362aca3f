//! # Per-evaluation consumer state.
//!
//! One [`EvaluationConsumer`] exists per evaluation id seen by a consumer process. All three
//! channel workers feed it; its state lock serializes them.
//!
//! ```text
//! CONSUMER_REQUIRED ──► offer once if formats intersect
//! description ───────► addressed to me? ── no ──► Declined
//!                              └─ yes ──► create consumers, drain pending statistics
//! statistics ────────► before description: pending
//!                      grouped + grouped consumer: aggregator (runs when group is ready)
//!                      otherwise: consume with retry budget
//! GROUP_COMPLETE ────► finalize group count, aggregate if ready
//! PUBLICATION_COMPLETE ► finalize evaluation count
//! PUBLICATION_STOPPED ─► Stopped (local only)
//! description timeout ─► still no description: Failed if offered or holding statistics,
//!                        Declined otherwise
//!
//! complete = description + publication complete + counts match + no open aggregator
//! ```
//!
//! ## Rules
//! - Once the outcome leaves `Open`, every message is discarded and buffers are dropped.
//! - A terminal failure bumps the process-wide failed counter exactly once.
//! - Heartbeats carry the number of statistics taken in, buffered or written.
//! - Resources written so far travel with the terminal status, failed or complete.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::consumer::guarded;
use super::{
    ConsumerFactory, ConsumerProgress, EvaluationOutcome, ExpectedCounts, GroupAggregator,
    GroupedConsumer, Resources, StatisticsConsumer,
};
use crate::error::{AggregatorError, ConsumerError};
use crate::message::{
    CompletionStatus, ConsumerDescription, EvaluationDescription, EvaluationId, EvaluationStatus,
    Format, GroupId, Properties, Statistics,
};
use crate::transport::TransportContext;

/// Shared by every evaluation of one consumer process.
pub(crate) struct ProcessContext {
    pub(crate) ctx: TransportContext,
    pub(crate) factory: Arc<dyn ConsumerFactory>,
    pub(crate) me: ConsumerDescription,
    pub(crate) token: CancellationToken,
    pub(crate) failed: AtomicU64,
    pub(crate) completed: AtomicU64,
}

#[derive(Default)]
struct ConsumerState {
    description: Option<EvaluationDescription>,
    consumer: Option<Arc<dyn StatisticsConsumer>>,
    grouped: Option<Arc<dyn GroupedConsumer>>,
    pending: Vec<Statistics>,
    aggregators: HashMap<GroupId, GroupAggregator<Statistics>>,
    counts: ExpectedCounts,
    progress: ConsumerProgress,
    resources: Resources,
    publication_complete: bool,
}

impl ConsumerState {
    fn release(&mut self) {
        self.consumer = None;
        self.grouped = None;
        self.pending = Vec::new();
        self.aggregators = HashMap::new();
    }
}

pub(crate) struct EvaluationConsumer {
    evaluation_id: EvaluationId,
    process: Arc<ProcessContext>,
    outcome: Mutex<EvaluationOutcome>,
    offered: AtomicBool,
    state: tokio::sync::Mutex<ConsumerState>,
}

impl EvaluationConsumer {
    pub(crate) fn new(evaluation_id: EvaluationId, process: Arc<ProcessContext>) -> Self {
        Self {
            evaluation_id,
            process,
            outcome: Mutex::new(EvaluationOutcome::Open),
            offered: AtomicBool::new(false),
            state: tokio::sync::Mutex::new(ConsumerState::default()),
        }
    }

    fn lock_outcome(&self) -> MutexGuard<'_, EvaluationOutcome> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn outcome(&self) -> EvaluationOutcome {
        *self.lock_outcome()
    }

    fn is_open(&self) -> bool {
        self.outcome() == EvaluationOutcome::Open
    }

    /// Moves `Open → to`; false if already terminal.
    fn finish(&self, to: EvaluationOutcome) -> bool {
        let mut outcome = self.lock_outcome();
        if *outcome != EvaluationOutcome::Open {
            return false;
        }
        *outcome = to;
        true
    }

    pub(crate) async fn progress(&self) -> ConsumerProgress {
        self.state.lock().await.progress
    }

    pub(crate) async fn on_status(&self, status: EvaluationStatus, group: Option<GroupId>) {
        match status.completion_status {
            CompletionStatus::ConsumerRequired => self.offer(&status.formats_required).await,
            CompletionStatus::GroupCompleteReportedSuccess => {
                let Some(group) = group else {
                    warn!(target: "evalbus.consumer", evaluation_id = %self.evaluation_id, "group complete without group id");
                    return;
                };
                let mut state = self.state.lock().await;
                if !self.is_open() {
                    return;
                }
                let expected = status.message_count.unwrap_or(0);
                if let Err(e) = state.counts.finalize_group(&group, expected) {
                    self.fail(&mut state, e.to_string()).await;
                    return;
                }
                self.aggregate_if_ready(&mut state, &group).await;
                self.complete_if_done(&mut state).await;
            }
            CompletionStatus::PublicationCompleteReportedSuccess => {
                let mut state = self.state.lock().await;
                if !self.is_open() {
                    return;
                }
                if let Err(e) = state.counts.finalize(status.message_count.unwrap_or(0)) {
                    self.fail(&mut state, e.to_string()).await;
                    return;
                }
                state.publication_complete = true;
                self.complete_if_done(&mut state).await;
            }
            CompletionStatus::PublicationStopped => {
                let mut state = self.state.lock().await;
                let reason = status.reason.unwrap_or_else(|| "publication stopped".to_string());
                self.stop(&mut state, &reason);
            }
            _ => {}
        }
    }

    pub(crate) async fn on_description(&self, description: EvaluationDescription, properties: &Properties) {
        let mut state = self.state.lock().await;
        if !self.is_open() || state.description.is_some() {
            trace!(target: "evalbus.consumer", evaluation_id = %self.evaluation_id, "description discarded");
            return;
        }

        let me = &self.process.me.consumer_id;
        if !properties.is_addressed_to(me) {
            if self.finish(EvaluationOutcome::Declined) {
                state.release();
                debug!(target: "evalbus.consumer", evaluation_id = %self.evaluation_id, consumer_id = %me, "negotiated to other consumers");
            }
            return;
        }

        let factory = &self.process.factory;
        let consumer = match factory.create_consumer(&self.evaluation_id, &description) {
            Ok(consumer) => consumer,
            Err(e) => {
                self.fail(&mut state, format!("creating consumer: {e}")).await;
                return;
            }
        };
        state.grouped = factory.create_grouped_consumer(&self.evaluation_id, &description);
        state.consumer = Some(consumer);
        state.description = Some(description);
        info!(
            target: "evalbus.consumer",
            evaluation_id = %self.evaluation_id,
            consumer_id = %me,
            pending = state.pending.len(),
            grouped = state.grouped.is_some(),
            "consuming evaluation"
        );

        let pending = std::mem::take(&mut state.pending);
        for statistics in pending {
            if !self.is_open() {
                break;
            }
            self.consume(&mut state, statistics).await;
        }
        self.complete_if_done(&mut state).await;
    }

    pub(crate) async fn on_statistics(&self, statistics: Statistics) {
        let mut state = self.state.lock().await;
        if !self.is_open() {
            trace!(target: "evalbus.consumer", evaluation_id = %self.evaluation_id, "statistics discarded");
            return;
        }
        if state.description.is_none() {
            state.pending.push(statistics);
            return;
        }
        self.consume(&mut state, statistics).await;
        self.complete_if_done(&mut state).await;
    }

    pub(crate) async fn notify_alive(&self) {
        if self.is_open() && self.offered.load(Ordering::SeqCst) {
            self.send_offer().await;
        }
    }

    pub(crate) async fn mark_failed(&self, cause: &str) -> bool {
        let mut state = self.state.lock().await;
        self.fail(&mut state, cause.to_string()).await
    }

    /// Ends an evaluation whose description did not arrive within `timeout`.
    ///
    /// An evaluation this process neither offered for nor holds statistics of is simply
    /// not its own; anything else fails.
    pub(crate) async fn on_description_timeout(&self, timeout: std::time::Duration) {
        let mut state = self.state.lock().await;
        if !self.is_open() || state.description.is_some() {
            return;
        }
        if !self.offered.load(Ordering::SeqCst) && state.pending.is_empty() {
            if self.finish(EvaluationOutcome::Declined) {
                state.release();
                debug!(target: "evalbus.consumer", evaluation_id = %self.evaluation_id, "no description, never offered");
            }
            return;
        }
        let pending = state.pending.len();
        self.fail(
            &mut state,
            format!("no evaluation description within {timeout:?}, {pending} statistics discarded"),
        )
        .await;
    }

    async fn offer(&self, required: &[Format]) {
        if !self.is_open() {
            return;
        }
        let me = &self.process.me;
        if !required.iter().any(|f| me.formats.contains(f)) {
            return;
        }
        if self.offered.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(target: "evalbus.consumer", evaluation_id = %self.evaluation_id, consumer_id = %me.consumer_id, "offering");
        self.send_offer().await;
    }

    async fn send_offer(&self) {
        let status = self.status(CompletionStatus::ReadyToConsume);
        self.send(status, None).await;
    }

    async fn consume(&self, state: &mut ConsumerState, statistics: Statistics) {
        let group = statistics.group_id().cloned();
        if let Err(e) = state.counts.record(group.as_ref()) {
            self.fail(state, e.to_string()).await;
            return;
        }

        match (group, state.grouped.clone()) {
            (Some(group), Some(grouped)) => {
                let aggregator = state
                    .aggregators
                    .entry(group.clone())
                    .or_insert_with(|| self.aggregator(group.clone(), grouped));
                if let Err(e) = aggregator.accept(statistics) {
                    self.fail(state, e.to_string()).await;
                    return;
                }
                self.heartbeat(state).await;
                self.aggregate_if_ready(state, &group).await;
            }
            _ => {
                let Some(consumer) = state.consumer.clone() else {
                    return;
                };
                let retry = self.process.ctx.config().retry;
                let mut attempts = 0;
                let result = retry
                    .run(&self.process.token, |attempt| {
                        attempts = attempt;
                        if attempt > 1 {
                            debug!(target: "evalbus.consumer", evaluation_id = %self.evaluation_id, attempt, "retrying statistics");
                        }
                        guarded(consumer.accept(&statistics))
                    })
                    .await;
                state.progress.retries += u64::from(attempts.saturating_sub(1));

                match result {
                    Ok(resources) => {
                        state.progress.consumed += 1;
                        state.resources.merge(resources);
                        self.heartbeat(state).await;
                    }
                    Err(e) => self.fail_consumer(state, e).await,
                }
            }
        }
    }

    fn aggregator(&self, group: GroupId, grouped: Arc<dyn GroupedConsumer>) -> GroupAggregator<Statistics> {
        let retry = self.process.ctx.config().retry;
        let token = self.process.token.clone();
        GroupAggregator::from_fn(group, move |group, items| {
            let grouped = grouped.clone();
            let token = token.clone();
            async move {
                retry
                    .run(&token, |_| guarded(grouped.accept_group(&group, &items)))
                    .await
            }
        })
    }

    async fn aggregate_if_ready(&self, state: &mut ConsumerState, group: &GroupId) {
        if !state.counts.is_group_ready(group) {
            return;
        }
        let Some(aggregator) = state.aggregators.get_mut(group) else {
            return;
        };
        if aggregator.is_used() {
            return;
        }

        let size = aggregator.size() as u64;
        match aggregator.accept_group().await {
            Ok(resources) => {
                state.progress.consumed += size;
                state.progress.groups += 1;
                state.resources.merge(resources);
                debug!(target: "evalbus.consumer", evaluation_id = %self.evaluation_id, group_id = %group, size, "group aggregated");
                let status = self
                    .status(CompletionStatus::GroupConsumptionComplete)
                    .with_message_count(size);
                self.send(status, Some(group.clone())).await;
            }
            Err(AggregatorError::Consumer { source, .. }) => self.fail_consumer(state, source).await,
            Err(e) => {
                self.fail(state, e.to_string()).await;
            }
        }
    }

    async fn complete_if_done(&self, state: &mut ConsumerState) {
        if state.description.is_none() || !state.publication_complete || !state.counts.is_complete() {
            return;
        }
        if state.aggregators.values().any(|a| !a.is_used()) {
            return;
        }
        if !self.finish(EvaluationOutcome::Completed) {
            return;
        }

        self.process.completed.fetch_add(1, Ordering::SeqCst);
        let consumed = state.counts.actual();
        let resources = std::mem::take(&mut state.resources);
        state.release();
        info!(
            target: "evalbus.consumer",
            evaluation_id = %self.evaluation_id,
            consumer_id = %self.process.me.consumer_id,
            consumed,
            retries = state.progress.retries,
            resources = resources.len(),
            "consumption complete"
        );
        let status = self
            .status(CompletionStatus::ConsumptionCompleteReportedSuccess)
            .with_message_count(consumed)
            .with_resources_created(resources);
        self.send(status, None).await;
    }

    async fn heartbeat(&self, state: &ConsumerState) {
        let status = self
            .status(CompletionStatus::ConsumptionOngoing)
            .with_message_count(state.counts.actual());
        self.send(status, None).await;
    }

    async fn fail_consumer(&self, state: &mut ConsumerState, err: ConsumerError) {
        match err {
            ConsumerError::Canceled => self.stop(state, "consumer process shutting down"),
            err => {
                self.fail(state, err.to_string()).await;
            }
        }
    }

    /// Fails the evaluation and reports upstream; false if it was already terminal.
    async fn fail(&self, state: &mut ConsumerState, reason: String) -> bool {
        if !self.finish(EvaluationOutcome::Failed) {
            return false;
        }
        let failed = self.process.failed.fetch_add(1, Ordering::SeqCst) + 1;
        let resources = std::mem::take(&mut state.resources);
        state.release();
        error!(
            target: "evalbus.consumer",
            evaluation_id = %self.evaluation_id,
            consumer_id = %self.process.me.consumer_id,
            %reason,
            failed,
            "evaluation failed"
        );
        let status = self
            .status(CompletionStatus::EvaluationFailed)
            .with_reason(reason)
            .with_resources_created(resources);
        self.send(status, None).await;
        true
    }

    fn stop(&self, state: &mut ConsumerState, reason: &str) {
        if self.finish(EvaluationOutcome::Stopped) {
            state.release();
            info!(target: "evalbus.consumer", evaluation_id = %self.evaluation_id, %reason, "evaluation stopped");
        }
    }

    fn status(&self, kind: CompletionStatus) -> EvaluationStatus {
        let me = &self.process.me;
        EvaluationStatus::new(kind, me.consumer_id.as_str()).with_consumer(me.clone())
    }

    async fn send(&self, status: EvaluationStatus, group: Option<GroupId>) {
        let properties = Properties::new(self.evaluation_id.clone())
            .with_consumer(self.process.me.consumer_id.clone())
            .with_group(group);
        if let Err(e) = self.process.ctx.send_status(properties, &status).await {
            warn!(
                target: "evalbus.consumer",
                evaluation_id = %self.evaluation_id,
                status = ?status.completion_status,
                error = %e,
                "status not sent"
            );
        }
    }
}
