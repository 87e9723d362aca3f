//! # Status events exchanged on the status channel.
//!
//! [`CompletionStatus`] classifies status events across three roles:
//! - **Negotiation**: the publisher asks for consumers, consumers offer themselves
//! - **Progress**: publication milestones and consumer heartbeats
//! - **Terminal**: consumption complete or evaluation failed
//!
//! The [`EvaluationStatus`] struct carries the optional metadata (consumer description,
//! message counts, reason) set depending on the status.
//!
//! ## Example
//! ```rust
//! use evalbus::{CompletionStatus, ConsumerDescription, ConsumerId, EvaluationStatus, Format};
//!
//! let status = EvaluationStatus::new(CompletionStatus::ReadyToConsume, "writer-host")
//!     .with_consumer(ConsumerDescription::new(ConsumerId::new("c1"), [Format::Png]));
//!
//! assert_eq!(status.completion_status, CompletionStatus::ReadyToConsume);
//! assert_eq!(status.consumer_id().map(|c| c.as_str()), Some("c1"));
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{ConsumerId, Format};

/// Classification of status events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    // === Negotiation ===
    /// Publisher announces that it needs consumers.
    ///
    /// Sets:
    /// - `formats_required`: formats still to negotiate
    ConsumerRequired,

    /// Consumer offers to write some formats for the evaluation.
    ///
    /// Sets:
    /// - `consumer`: id and formats of the offering consumer
    ReadyToConsume,

    // === Progress ===
    /// Consumer heartbeat after consuming statistics.
    ///
    /// Sets:
    /// - `consumer`: reporting consumer
    /// - `message_count`: statistics consumed so far
    ConsumptionOngoing,

    /// Publisher finalized one group.
    ///
    /// Sets:
    /// - `message_count`: statistics published in the group
    /// - group id travels in the `GROUP_ID` property
    GroupCompleteReportedSuccess,

    /// Consumer aggregated one group.
    ///
    /// Sets:
    /// - `consumer`: reporting consumer
    /// - `message_count`: statistics in the group
    GroupConsumptionComplete,

    /// Publisher finalized the evaluation.
    ///
    /// Sets:
    /// - `message_count`: statistics published
    /// - `group_count`: groups published
    /// - `pairs_count`: pairs messages published
    PublicationCompleteReportedSuccess,

    /// Publisher stopped the evaluation locally.
    ///
    /// Sets:
    /// - `reason`: local cause
    PublicationStopped,

    // === Terminal ===
    /// Consumer finished consuming everything it was sent.
    ///
    /// Sets:
    /// - `consumer`: reporting consumer
    /// - `message_count`: statistics consumed
    /// - `resources_created`: paths or URIs written
    ConsumptionCompleteReportedSuccess,

    /// Consumer failed the evaluation terminally.
    ///
    /// Sets:
    /// - `consumer`: reporting consumer
    /// - `reason`: failure detail
    /// - `resources_created`: paths or URIs written before the failure
    EvaluationFailed,
}

/// Identity and capabilities of one consumer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerDescription {
    /// Consumer identity.
    pub consumer_id: ConsumerId,
    /// Formats the consumer can write.
    pub formats: BTreeSet<Format>,
}

impl ConsumerDescription {
    /// Creates a description.
    pub fn new(consumer_id: ConsumerId, formats: impl IntoIterator<Item = Format>) -> Self {
        Self {
            consumer_id,
            formats: formats.into_iter().collect(),
        }
    }
}

/// One status event for an evaluation.
///
/// The evaluation id is not part of the payload; it travels in the `CORRELATION_ID`
/// property of the envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationStatus {
    /// Event classification.
    pub completion_status: CompletionStatus,
    /// Identity of the sending client (publisher or consumer host).
    pub client_id: String,
    /// Consumer the event is about, for consumer-originated events.
    #[serde(
        default,
        rename = "consumerDescription",
        skip_serializing_if = "Option::is_none"
    )]
    pub consumer: Option<ConsumerDescription>,
    /// Statistics message count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
    /// Group count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_count: Option<u64>,
    /// Pairs message count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairs_count: Option<u64>,
    /// Formats the publisher still needs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats_required: Vec<Format>,
    /// Human-readable reason (failures, stop cause).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Resources a consumer wrote, sent with its terminal status.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources_created: Vec<String>,
}

impl EvaluationStatus {
    /// Creates a status event of the given kind.
    pub fn new(completion_status: CompletionStatus, client_id: impl Into<String>) -> Self {
        Self {
            completion_status,
            client_id: client_id.into(),
            consumer: None,
            message_count: None,
            group_count: None,
            pairs_count: None,
            formats_required: Vec::new(),
            reason: None,
            resources_created: Vec::new(),
        }
    }

    /// Attaches the consumer description.
    #[inline]
    pub fn with_consumer(mut self, consumer: ConsumerDescription) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Attaches a statistics message count.
    #[inline]
    pub fn with_message_count(mut self, count: u64) -> Self {
        self.message_count = Some(count);
        self
    }

    /// Attaches a group count.
    #[inline]
    pub fn with_group_count(mut self, count: u64) -> Self {
        self.group_count = Some(count);
        self
    }

    /// Attaches a pairs message count.
    #[inline]
    pub fn with_pairs_count(mut self, count: u64) -> Self {
        self.pairs_count = Some(count);
        self
    }

    /// Attaches the required formats.
    #[inline]
    pub fn with_formats_required(mut self, formats: impl IntoIterator<Item = Format>) -> Self {
        self.formats_required = formats.into_iter().collect();
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the resources written by a consumer.
    #[inline]
    pub fn with_resources_created(mut self, resources: impl IntoIterator<Item = String>) -> Self {
        self.resources_created = resources.into_iter().collect();
        self
    }

    /// Consumer id carried by the event, if any.
    #[inline]
    pub fn consumer_id(&self) -> Option<&ConsumerId> {
        self.consumer.as_ref().map(|c| &c.consumer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_status_wire_names() {
        let names = [
            (CompletionStatus::ReadyToConsume, "READY_TO_CONSUME"),
            (
                CompletionStatus::GroupCompleteReportedSuccess,
                "GROUP_COMPLETE_REPORTED_SUCCESS",
            ),
            (
                CompletionStatus::PublicationCompleteReportedSuccess,
                "PUBLICATION_COMPLETE_REPORTED_SUCCESS",
            ),
            (
                CompletionStatus::ConsumptionCompleteReportedSuccess,
                "CONSUMPTION_COMPLETE_REPORTED_SUCCESS",
            ),
            (CompletionStatus::EvaluationFailed, "EVALUATION_FAILED"),
        ];
        for (status, name) in names {
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{name}\"")
            );
        }
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let status = EvaluationStatus::new(CompletionStatus::PublicationCompleteReportedSuccess, "p")
            .with_message_count(0);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["completionStatus"], "PUBLICATION_COMPLETE_REPORTED_SUCCESS");
        assert_eq!(json["clientId"], "p");
        assert_eq!(json["messageCount"], 0);
        assert!(json.get("consumerDescription").is_none());
        assert!(json.get("reason").is_none());
        assert!(json.get("resourcesCreated").is_none());
    }

    #[test]
    fn test_resources_created_on_the_wire() {
        let status = EvaluationStatus::new(CompletionStatus::ConsumptionCompleteReportedSuccess, "c1")
            .with_message_count(2)
            .with_resources_created(["out/a.csv".to_string(), "out/b.csv".to_string()]);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["resourcesCreated"], serde_json::json!(["out/a.csv", "out/b.csv"]));

        let back: EvaluationStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }
}
