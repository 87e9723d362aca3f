use std::time::Duration;

use crate::error::{EvaluationError, NegotiationError};
use crate::message::{ConsumerId, EvaluationId};

/// Lifecycle of one evaluation as seen from the status channel.
///
/// Transitions only move forward; `Completed` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrackerState {
    /// Collecting offers.
    AwaitingNegotiation,
    /// Every required format has a consumer.
    Negotiated,
    /// Publication complete; waiting for consumers to finish.
    AwaitingCompletion,
    /// Every negotiated consumer reported consumption complete.
    Completed,
    /// Negotiation timed out, a consumer failed or stalled, or the evaluation was stopped.
    Failed,
}

impl TrackerState {
    /// True for `Completed` and `Failed`.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrackerState::Completed | TrackerState::Failed)
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerState::AwaitingNegotiation => "awaiting_negotiation",
            TrackerState::Negotiated => "negotiated",
            TrackerState::AwaitingCompletion => "awaiting_completion",
            TrackerState::Completed => "completed",
            TrackerState::Failed => "failed",
        }
    }
}

/// First cause that moved a tracker to [`TrackerState::Failed`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Failure {
    Negotiation(NegotiationError),
    Consumer {
        consumer_id: ConsumerId,
        reason: String,
    },
    Stalled {
        consumer_id: ConsumerId,
        timeout: Duration,
    },
    Stopped {
        reason: String,
    },
}

impl Failure {
    pub(crate) fn is_stopped(&self) -> bool {
        matches!(self, Failure::Stopped { .. })
    }

    pub(crate) fn to_error(&self, evaluation_id: &EvaluationId) -> EvaluationError {
        match self {
            Failure::Negotiation(e) => EvaluationError::Negotiation(e.clone()),
            Failure::Consumer {
                consumer_id,
                reason,
            } => EvaluationError::Failed {
                evaluation_id: evaluation_id.clone(),
                reason: reason.clone(),
                consumers: vec![consumer_id.clone()],
            },
            Failure::Stalled {
                consumer_id,
                timeout,
            } => EvaluationError::ConsumptionTimeout {
                evaluation_id: evaluation_id.clone(),
                consumer_id: consumer_id.clone(),
                timeout: *timeout,
            },
            Failure::Stopped { reason } => EvaluationError::Failed {
                evaluation_id: evaluation_id.clone(),
                reason: format!("stopped: {reason}"),
                consumers: Vec::new(),
            },
        }
    }
}
