//! # Long-lived consumer process.
//!
//! One [`ConsumerProcess`] serves every evaluation published while it runs. It subscribes to the
//! status, evaluation and statistics channels and runs one worker per channel:
//!
//! ```text
//! Status      → worker ─┐
//! Evaluation  → worker ─┼─► entry(evaluation_id) ─► EvaluationConsumer
//! Statistics  → worker ─┘        │
//!                                └─ closed id? → acknowledged and discarded
//! ```
//!
//! ## Rules
//! - Each channel is processed in delivery order; nothing is ordered across channels.
//! - Status events carrying a `CONSUMER_ID` come from consumers and are never handled here.
//! - An entry is created on first sight of an evaluation id; racing workers converge on it.
//! - An entry still without a description after `description_timeout` is ended.
//! - [`ConsumerProcess::sweep`] is explicit. Swept ids stay closed as tombstones, so a failed
//!   evaluation is never reopened by a redelivered message.
//! - Tombstones are kept until [`ConsumerProcess::prune_tombstones`] drops them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::evaluation::{EvaluationConsumer, ProcessContext};
use super::{ConsumerFactory, ConsumerProgress, EvaluationOutcome};
use crate::error::TransportError;
use crate::message::{
    Channel, ConsumerDescription, Envelope, EvaluationDescription, EvaluationId, EvaluationStatus,
    Statistics, codec,
};
use crate::transport::{Filter, Subscription, TransportContext};

#[derive(Clone, Copy)]
struct Tombstone {
    outcome: EvaluationOutcome,
    swept_at: Instant,
}

#[derive(Default)]
struct Evaluations {
    open: HashMap<EvaluationId, Arc<EvaluationConsumer>>,
    /// One per swept id; grows until pruned.
    closed: HashMap<EvaluationId, Tombstone>,
}

struct Inner {
    process: Arc<ProcessContext>,
    evaluations: RwLock<Evaluations>,
}

/// Consumer side of the protocol for one process.
pub struct ConsumerProcess {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ConsumerProcess {
    /// Subscribes to every channel it needs and starts one worker per channel.
    pub async fn start(
        factory: Arc<dyn ConsumerFactory>,
        ctx: TransportContext,
    ) -> Result<Self, TransportError> {
        let me = factory.consumer_description();
        let transport = ctx.transport().clone();

        let mut subscriptions = Vec::with_capacity(3);
        for channel in [Channel::Status, Channel::Evaluation, Channel::Statistics] {
            subscriptions.push(transport.subscribe(channel, Filter::all()).await?);
        }

        let inner = Arc::new(Inner {
            process: Arc::new(ProcessContext {
                ctx,
                factory,
                me,
                token: CancellationToken::new(),
                failed: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            }),
            evaluations: RwLock::new(Evaluations::default()),
        });

        let workers = subscriptions
            .into_iter()
            .map(|subscription| tokio::spawn(inner.clone().listen(subscription)))
            .collect();

        info!(
            target: "evalbus.consumer",
            consumer_id = %inner.process.me.consumer_id,
            formats = ?inner.process.me.formats,
            "consumer process started"
        );
        Ok(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    /// Identity and formats this process offers.
    pub fn consumer_description(&self) -> &ConsumerDescription {
        &self.inner.process.me
    }

    /// Evaluations that failed terminally since start.
    pub fn failed_evaluation_count(&self) -> u64 {
        self.inner.process.failed.load(Ordering::SeqCst)
    }

    /// Evaluations completed since start.
    pub fn completed_evaluation_count(&self) -> u64 {
        self.inner.process.completed.load(Ordering::SeqCst)
    }

    /// Entries still held in memory whose outcome is `Open`.
    pub async fn open_evaluation_count(&self) -> usize {
        let evaluations = self.inner.evaluations.read().await;
        evaluations
            .open
            .values()
            .filter(|e| !e.outcome().is_terminal())
            .count()
    }

    /// Outcome of an evaluation, swept or not; `None` if the id was never seen.
    pub async fn evaluation_outcome(&self, evaluation_id: &EvaluationId) -> Option<EvaluationOutcome> {
        let evaluations = self.inner.evaluations.read().await;
        if let Some(entry) = evaluations.open.get(evaluation_id) {
            return Some(entry.outcome());
        }
        evaluations.closed.get(evaluation_id).map(|t| t.outcome)
    }

    /// Consumption progress of an evaluation still held in memory.
    pub async fn evaluation_progress(&self, evaluation_id: &EvaluationId) -> Option<ConsumerProgress> {
        let entry = self.inner.evaluations.read().await.open.get(evaluation_id).cloned()?;
        Some(entry.progress().await)
    }

    /// Drops every terminal entry from memory, keeping its id closed.
    ///
    /// Returns the number of entries removed. Open evaluations are untouched.
    pub async fn sweep(&self) -> usize {
        let mut evaluations = self.inner.evaluations.write().await;
        let terminal: Vec<(EvaluationId, EvaluationOutcome)> = evaluations
            .open
            .iter()
            .map(|(id, entry)| (id.clone(), entry.outcome()))
            .filter(|(_, outcome)| outcome.is_terminal())
            .collect();

        let swept_at = Instant::now();
        for (id, outcome) in &terminal {
            evaluations.open.remove(id);
            evaluations.closed.insert(
                id.clone(),
                Tombstone {
                    outcome: *outcome,
                    swept_at,
                },
            );
        }
        if !terminal.is_empty() {
            debug!(target: "evalbus.consumer", swept = terminal.len(), "swept evaluations");
        }
        terminal.len()
    }

    /// Forgets tombstones swept at least `max_age` ago; returns how many were dropped.
    ///
    /// A forgotten id counts as new if one of its messages is delivered again.
    pub async fn prune_tombstones(&self, max_age: Duration) -> usize {
        let mut evaluations = self.inner.evaluations.write().await;
        let before = evaluations.closed.len();
        evaluations
            .closed
            .retain(|_, tombstone| tombstone.swept_at.elapsed() < max_age);
        let pruned = before - evaluations.closed.len();
        if pruned > 0 {
            debug!(target: "evalbus.consumer", pruned, "pruned tombstones");
        }
        pruned
    }

    /// Re-sends the offer of every open evaluation this process offered for.
    pub async fn notify_alive(&self) {
        for entry in self.inner.snapshot().await {
            entry.notify_alive().await;
        }
    }

    /// Fails every open evaluation with `cause`; returns how many were failed.
    pub async fn mark_failed(&self, cause: &str) -> usize {
        let mut failed = 0;
        for entry in self.inner.snapshot().await {
            if entry.mark_failed(cause).await {
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(target: "evalbus.consumer", failed, %cause, "open evaluations marked failed");
        }
        failed
    }

    /// Cancels the workers and waits for them to exit.
    ///
    /// Consumption in progress ends with a local stop when its retry backoff is cancelled.
    pub async fn shutdown(&self) {
        self.inner.process.token.cancel();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            let _ = worker.await;
        }
        info!(target: "evalbus.consumer", consumer_id = %self.inner.process.me.consumer_id, "consumer process stopped");
    }
}

impl Drop for ConsumerProcess {
    fn drop(&mut self) {
        self.inner.process.token.cancel();
    }
}

impl std::fmt::Debug for ConsumerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerProcess")
            .field("consumer", &self.inner.process.me)
            .field("failed", &self.failed_evaluation_count())
            .field("completed", &self.completed_evaluation_count())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn listen(self: Arc<Self>, mut subscription: Subscription) {
        let channel = subscription.channel();
        let token = self.process.token.clone();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                envelope = subscription.recv() => match envelope {
                    Some(envelope) => self.dispatch(envelope).await,
                    None => {
                        debug!(target: "evalbus.consumer", channel = channel.as_str(), "subscription ended");
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, envelope: Envelope) {
        let Envelope {
            channel,
            properties,
            payload,
        } = envelope;

        match channel {
            Channel::Status => {
                if properties.consumer_id.is_some() {
                    return;
                }
                let status: EvaluationStatus = match codec::decode(&payload) {
                    Ok(status) => status,
                    Err(e) => return self.undecodable(channel, &properties.correlation_id, &e),
                };
                if let Some(entry) = self.entry(&properties.correlation_id).await {
                    entry.on_status(status, properties.group_id).await;
                }
            }
            Channel::Evaluation => {
                let description: EvaluationDescription = match codec::decode(&payload) {
                    Ok(description) => description,
                    Err(e) => return self.undecodable(channel, &properties.correlation_id, &e),
                };
                if let Some(entry) = self.entry(&properties.correlation_id).await {
                    entry.on_description(description, &properties).await;
                }
            }
            Channel::Statistics => {
                if let Some(entry) = self.entry(&properties.correlation_id).await {
                    entry.on_statistics(Statistics::new(payload, properties.group_id)).await;
                }
            }
            Channel::Pairs => {}
        }
    }

    /// Existing or new entry; `None` once the id is closed.
    async fn entry(&self, evaluation_id: &EvaluationId) -> Option<Arc<EvaluationConsumer>> {
        {
            let evaluations = self.evaluations.read().await;
            if let Some(entry) = evaluations.open.get(evaluation_id) {
                return Some(entry.clone());
            }
            if evaluations.closed.contains_key(evaluation_id) {
                return None;
            }
        }

        let mut evaluations = self.evaluations.write().await;
        if evaluations.closed.contains_key(evaluation_id) {
            return None;
        }
        if let Some(entry) = evaluations.open.get(evaluation_id) {
            return Some(entry.clone());
        }
        debug!(target: "evalbus.consumer", %evaluation_id, "new evaluation");
        let entry = Arc::new(EvaluationConsumer::new(evaluation_id.clone(), self.process.clone()));
        evaluations.open.insert(evaluation_id.clone(), entry.clone());
        drop(evaluations);

        self.watch_description(&entry);
        Some(entry)
    }

    /// Ends `entry` if its description is still missing after `description_timeout`.
    fn watch_description(&self, entry: &Arc<EvaluationConsumer>) {
        let Some(timeout) = self.process.ctx.config().description_wait() else {
            return;
        };
        let entry = Arc::downgrade(entry);
        let token = self.process.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(entry) = entry.upgrade() {
                        entry.on_description_timeout(timeout).await;
                    }
                }
            }
        });
    }

    async fn snapshot(&self) -> Vec<Arc<EvaluationConsumer>> {
        self.evaluations.read().await.open.values().cloned().collect()
    }

    fn undecodable(&self, channel: Channel, evaluation_id: &EvaluationId, err: &dyn std::fmt::Display) {
        warn!(
            target: "evalbus.consumer",
            channel = channel.as_str(),
            %evaluation_id,
            error = %err,
            "undecodable message"
        );
    }
}
