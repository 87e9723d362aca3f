//! Error types used by evalbus publishers, trackers and consumer processes.
//!
//! This module defines one error enum per seam:
//!
//! - [`TransportError`] broker/connection failures, propagated to the caller of the affected operation.
//! - [`ConsumerError`] failures raised by host-supplied consumer functions (recoverable or fatal).
//! - [`NegotiationError`] failures to assign a consumer to every required format.
//! - [`AggregatorError`] misuse or failure of a one-shot [`GroupAggregator`](crate::GroupAggregator).
//! - [`EvaluationError`] everything the [`EvaluationPublisher`](crate::EvaluationPublisher) surfaces.
//!
//! Every type provides `as_label` (stable snake_case label for logs) and [`ConsumerError`]
//! additionally provides [`ConsumerError::is_retryable`].

use std::time::Duration;

use thiserror::Error;

use crate::message::{Channel, ConsumerId, EvaluationId, Format, GroupId};

/// # Errors produced by the transport collaborator.
///
/// There is no automatic reconnect inside evalbus; these are fatal for the operation that hit them.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection to the broker was lost.
    #[error("transport disconnected: {reason}")]
    Disconnected {
        /// Broker-specific detail.
        reason: String,
    },

    /// The channel no longer accepts messages or subscriptions.
    #[error("channel {channel} closed")]
    Closed {
        /// Affected channel.
        channel: Channel,
    },

    /// Message properties could not be interpreted.
    #[error("malformed message properties: {reason}")]
    Malformed {
        /// What was wrong.
        reason: String,
    },
}

impl TransportError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use evalbus::TransportError;
    ///
    /// let err = TransportError::Disconnected { reason: "broker gone".into() };
    /// assert_eq!(err.as_label(), "transport_disconnected");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::Disconnected { .. } => "transport_disconnected",
            TransportError::Closed { .. } => "transport_closed",
            TransportError::Malformed { .. } => "transport_malformed",
        }
    }
}

/// # Errors produced by consumer functions.
///
/// The split between [`ConsumerError::Recoverable`] and [`ConsumerError::Fatal`] drives the
/// retry budget: recoverable errors are retried and leave the evaluation open, everything else
/// terminates the evaluation at this consumer.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// Consumption failed but may succeed if retried.
    #[error("consumption failed: {error}")]
    Recoverable {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable error (never retried).
    #[error("fatal consumer error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Recoverable failures kept happening until the retry budget ran out.
    #[error("retry budget exhausted after {attempts} attempts: {error}")]
    Exhausted {
        /// Total attempts made, including the first.
        attempts: u32,
        /// Message of the last failure.
        error: String,
    },

    /// Consumption was abandoned because the consumer process is shutting down.
    #[error("consumption cancelled")]
    Canceled,
}

impl ConsumerError {
    /// Shorthand for [`ConsumerError::Recoverable`].
    pub fn recoverable(error: impl Into<String>) -> Self {
        ConsumerError::Recoverable {
            error: error.into(),
        }
    }

    /// Shorthand for [`ConsumerError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        ConsumerError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConsumerError::Recoverable { .. } => "consumer_recoverable",
            ConsumerError::Fatal { .. } => "consumer_fatal",
            ConsumerError::Exhausted { .. } => "consumer_retries_exhausted",
            ConsumerError::Canceled => "consumer_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ConsumerError::Recoverable { error } => format!("error: {error}"),
            ConsumerError::Fatal { error } => format!("fatal: {error}"),
            ConsumerError::Exhausted { attempts, error } => {
                format!("exhausted after {attempts} attempts: {error}")
            }
            ConsumerError::Canceled => "consumption cancelled".to_string(),
        }
    }

    /// Indicates whether the error is eligible for another attempt.
    ///
    /// # Example
    /// ```
    /// use evalbus::ConsumerError;
    ///
    /// assert!(ConsumerError::recoverable("disk busy").is_retryable());
    /// assert!(!ConsumerError::fatal("bad format").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConsumerError::Recoverable { .. })
    }
}

/// # Errors produced by consumer negotiation.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// No approved offer covered these formats before the deadline.
    #[error("negotiation timed out after {timeout:?}; uncovered formats: {missing:?}")]
    Timeout {
        /// The deadline that elapsed (without liveness resets).
        timeout: Duration,
        /// Required formats that were never covered.
        missing: Vec<Format>,
    },

    /// The offer stream ended while formats were still uncovered.
    #[error("offer stream ended; uncovered formats: {missing:?}")]
    StreamEnded {
        /// Required formats that were never covered.
        missing: Vec<Format>,
    },

    /// Negotiation was abandoned by its owner (stop or close).
    #[error("negotiation abandoned: {reason}")]
    Abandoned {
        /// Why negotiation stopped.
        reason: String,
    },
}

impl NegotiationError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            NegotiationError::Timeout { .. } => "negotiation_timeout",
            NegotiationError::StreamEnded { .. } => "negotiation_stream_ended",
            NegotiationError::Abandoned { .. } => "negotiation_abandoned",
        }
    }
}

/// # Errors produced by a [`GroupAggregator`](crate::GroupAggregator).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    /// The aggregator already ran its aggregation function.
    #[error("aggregator for group {group_id} already used")]
    Reused {
        /// Group the aggregator belongs to.
        group_id: GroupId,
    },

    /// The aggregation function itself failed.
    #[error("aggregation of group {group_id} failed: {source}")]
    Consumer {
        /// Group the aggregator belongs to.
        group_id: GroupId,
        /// Error returned by the aggregation function.
        #[source]
        source: ConsumerError,
    },
}

impl AggregatorError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            AggregatorError::Reused { .. } => "aggregator_reused",
            AggregatorError::Consumer { .. } => "aggregator_consumer_failed",
        }
    }
}

/// Actual message count went past the expected count.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{scope}: consumed {actual} messages but {expected} were expected")]
pub struct CountMismatch {
    /// `"evaluation"` or `"group <id>"`.
    pub scope: String,
    /// Finalized expected count.
    pub expected: u64,
    /// Actual count at the time of the mismatch.
    pub actual: u64,
}

/// # Errors surfaced by an [`EvaluationPublisher`](crate::EvaluationPublisher).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EvaluationError {
    /// Operation is not valid in the publisher's current lifecycle phase.
    #[error("evaluation {evaluation_id}: illegal state: {reason}")]
    IllegalState {
        /// Evaluation concerned.
        evaluation_id: EvaluationId,
        /// What was attempted and why it is not allowed.
        reason: String,
    },

    /// A payload could not be encoded. The evaluation is not marked failed.
    #[error("failed to serialize {what}: {source}")]
    Serialization {
        /// Kind of payload (`"statistics"`, `"pairs"`, ...).
        what: &'static str,
        /// Encoder error.
        #[source]
        source: serde_json::Error,
    },

    /// Consumers could not be negotiated.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A negotiated consumer reported a terminal failure.
    #[error("evaluation {evaluation_id} failed to complete: {reason}")]
    Failed {
        /// Evaluation concerned.
        evaluation_id: EvaluationId,
        /// Failure detail reported by the consumer (or the local cause).
        reason: String,
        /// Consumers that reported the failure.
        consumers: Vec<ConsumerId>,
    },

    /// A negotiated consumer made no progress within the consumption timeout.
    #[error("evaluation {evaluation_id}: consumer {consumer_id} made no progress for {timeout:?}")]
    ConsumptionTimeout {
        /// Evaluation concerned.
        evaluation_id: EvaluationId,
        /// Consumer that stalled.
        consumer_id: ConsumerId,
        /// Timeout that elapsed without a liveness signal.
        timeout: Duration,
    },
}

impl EvaluationError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use evalbus::{EvaluationError, EvaluationId};
    ///
    /// let err = EvaluationError::IllegalState {
    ///     evaluation_id: EvaluationId::new("e1"),
    ///     reason: "publish after stop".into(),
    /// };
    /// assert_eq!(err.as_label(), "evaluation_illegal_state");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            EvaluationError::IllegalState { .. } => "evaluation_illegal_state",
            EvaluationError::Serialization { .. } => "evaluation_serialization",
            EvaluationError::Negotiation(e) => e.as_label(),
            EvaluationError::Transport(e) => e.as_label(),
            EvaluationError::Failed { .. } => "evaluation_failed",
            EvaluationError::ConsumptionTimeout { .. } => "evaluation_consumption_timeout",
        }
    }

    /// True when the error means the evaluation reached the failed terminal state.
    pub fn is_evaluation_failure(&self) -> bool {
        matches!(
            self,
            EvaluationError::Failed { .. }
                | EvaluationError::ConsumptionTimeout { .. }
                | EvaluationError::Negotiation(_)
        )
    }
}
