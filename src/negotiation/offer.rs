use std::collections::{BTreeMap, BTreeSet};

use crate::message::{CompletionStatus, ConsumerId, EvaluationStatus, Format};

/// A consumer's declaration that it can write some formats for an evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerOffer {
    /// Offering consumer.
    pub consumer_id: ConsumerId,
    /// Formats it can write.
    pub formats: BTreeSet<Format>,
    /// False for offers that only announce presence.
    pub ready: bool,
}

impl ConsumerOffer {
    /// Creates a ready offer.
    pub fn new(consumer_id: ConsumerId, formats: impl IntoIterator<Item = Format>) -> Self {
        Self {
            consumer_id,
            formats: formats.into_iter().collect(),
            ready: true,
        }
    }

    /// Extracts the offer carried by a `READY_TO_CONSUME` status event.
    pub fn from_status(status: &EvaluationStatus) -> Option<Self> {
        if status.completion_status != CompletionStatus::ReadyToConsume {
            return None;
        }
        status.consumer.as_ref().map(|c| Self {
            consumer_id: c.consumer_id.clone(),
            formats: c.formats.clone(),
            ready: true,
        })
    }
}

/// Immutable assignment of one consumer per required format.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NegotiationResult {
    assignments: BTreeMap<Format, ConsumerId>,
}

impl NegotiationResult {
    pub(crate) fn new(assignments: BTreeMap<Format, ConsumerId>) -> Self {
        Self { assignments }
    }

    /// Consumer assigned to `format`.
    pub fn get(&self, format: Format) -> Option<&ConsumerId> {
        self.assignments.get(&format)
    }

    /// Distinct consumers in the assignment, sorted.
    pub fn consumers(&self) -> BTreeSet<ConsumerId> {
        self.assignments.values().cloned().collect()
    }

    /// Formats assigned to one consumer.
    pub fn formats_for(&self, consumer_id: &ConsumerId) -> BTreeSet<Format> {
        self.assignments
            .iter()
            .filter(|(_, c)| *c == consumer_id)
            .map(|(f, _)| *f)
            .collect()
    }

    /// Assigned formats.
    pub fn formats(&self) -> BTreeSet<Format> {
        self.assignments.keys().copied().collect()
    }

    /// Iterates `(format, consumer)` pairs in format order.
    pub fn iter(&self) -> impl Iterator<Item = (Format, &ConsumerId)> {
        self.assignments.iter().map(|(f, c)| (*f, c))
    }

    /// Number of assigned formats.
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// True when nothing was required.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// The assignment as a map, for routing tags.
    pub fn as_map(&self) -> &BTreeMap<Format, ConsumerId> {
        &self.assignments
    }
}
