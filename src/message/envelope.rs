//! # Transport envelopes and message properties.
//!
//! Every message on every channel is an [`Envelope`]: the channel, typed [`Properties`] and the
//! encoded payload. Broker bindings that only understand string maps use
//! [`Properties::to_map`] / [`Properties::from_map`].
//!
//! ## Property keys
//! ```text
//! MESSAGE_ID      fresh per message
//! CORRELATION_ID  evaluation id
//! GROUP_ID        optional, grouped statistics and group status
//! CONSUMER_ID     optional, consumer-originated status
//! <FORMAT>        routing tag, one per negotiated format, value = consumer id
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::{ConsumerId, EvaluationId, Format, GroupId};
use crate::error::TransportError;

/// Property key of the message id.
pub const MESSAGE_ID: &str = "MESSAGE_ID";
/// Property key of the evaluation id.
pub const CORRELATION_ID: &str = "CORRELATION_ID";
/// Property key of the group id.
pub const GROUP_ID: &str = "GROUP_ID";
/// Property key of the consumer id.
pub const CONSUMER_ID: &str = "CONSUMER_ID";

/// Logical channel (topic) a message travels on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Evaluation descriptions.
    Evaluation,
    /// Status events.
    Status,
    /// Statistics.
    Statistics,
    /// Paired time-series.
    Pairs,
}

impl Channel {
    /// Every channel.
    pub const ALL: [Channel; 4] = [
        Channel::Evaluation,
        Channel::Status,
        Channel::Statistics,
        Channel::Pairs,
    ];

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Evaluation => "evaluation",
            Channel::Status => "status",
            Channel::Statistics => "statistics",
            Channel::Pairs => "pairs",
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Channel::Evaluation => 0,
            Channel::Status => 1,
            Channel::Statistics => 2,
            Channel::Pairs => 3,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed message properties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Properties {
    /// Unique id of this message.
    pub message_id: String,
    /// Evaluation the message belongs to.
    pub correlation_id: EvaluationId,
    /// Group the message belongs to.
    pub group_id: Option<GroupId>,
    /// Consumer that sent the message.
    pub consumer_id: Option<ConsumerId>,
    /// Negotiated consumer per format.
    pub routing: BTreeMap<Format, ConsumerId>,
}

impl Properties {
    /// Creates properties for a new message of the given evaluation.
    pub fn new(correlation_id: EvaluationId) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            correlation_id,
            group_id: None,
            consumer_id: None,
            routing: BTreeMap::new(),
        }
    }

    /// Attaches a group id.
    #[inline]
    pub fn with_group(mut self, group_id: Option<GroupId>) -> Self {
        self.group_id = group_id;
        self
    }

    /// Attaches the sending consumer.
    #[inline]
    pub fn with_consumer(mut self, consumer_id: ConsumerId) -> Self {
        self.consumer_id = Some(consumer_id);
        self
    }

    /// Attaches routing tags.
    #[inline]
    pub fn with_routing(mut self, routing: BTreeMap<Format, ConsumerId>) -> Self {
        self.routing = routing;
        self
    }

    /// True if any routing tag names the given consumer.
    pub fn is_addressed_to(&self, consumer_id: &ConsumerId) -> bool {
        self.routing.values().any(|c| c == consumer_id)
    }

    /// Flattens the properties into a string map.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(MESSAGE_ID.to_string(), self.message_id.clone());
        map.insert(
            CORRELATION_ID.to_string(),
            self.correlation_id.as_str().to_string(),
        );
        if let Some(group) = &self.group_id {
            map.insert(GROUP_ID.to_string(), group.as_str().to_string());
        }
        if let Some(consumer) = &self.consumer_id {
            map.insert(CONSUMER_ID.to_string(), consumer.as_str().to_string());
        }
        for (format, consumer) in &self.routing {
            map.insert(format.as_str().to_string(), consumer.as_str().to_string());
        }
        map
    }

    /// Rebuilds typed properties from a string map.
    ///
    /// Keys that are neither well-known nor a format name are ignored.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, TransportError> {
        let required = |key: &str| {
            map.get(key).cloned().ok_or_else(|| TransportError::Malformed {
                reason: format!("missing {key}"),
            })
        };

        let mut props = Properties {
            message_id: required(MESSAGE_ID)?,
            correlation_id: EvaluationId::new(required(CORRELATION_ID)?),
            group_id: map.get(GROUP_ID).map(|g| GroupId::new(g.as_str())),
            consumer_id: map.get(CONSUMER_ID).map(|c| ConsumerId::new(c.as_str())),
            routing: BTreeMap::new(),
        };
        for (key, value) in map {
            if let Ok(format) = key.parse::<Format>() {
                props.routing.insert(format, ConsumerId::new(value.as_str()));
            }
        }
        Ok(props)
    }
}

/// One message on the transport.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// Channel the message travels on.
    pub channel: Channel,
    /// Message properties.
    pub properties: Properties,
    /// Encoded payload, shared between receivers.
    pub payload: Arc<[u8]>,
}

impl Envelope {
    /// Creates an envelope.
    pub fn new(channel: Channel, properties: Properties, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            channel,
            properties,
            payload: payload.into(),
        }
    }

    /// Evaluation the message belongs to.
    #[inline]
    pub fn evaluation_id(&self) -> &EvaluationId {
        &self.properties.correlation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_map_keeps_routing_and_optional_keys() {
        let mut routing = BTreeMap::new();
        routing.insert(Format::Png, ConsumerId::new("c1"));
        routing.insert(Format::Csv, ConsumerId::new("c2"));
        let props = Properties::new(EvaluationId::new("e1"))
            .with_group(Some(GroupId::new("g1")))
            .with_routing(routing);

        let map = props.to_map();
        assert_eq!(map.get(CORRELATION_ID).map(String::as_str), Some("e1"));
        assert_eq!(map.get("PNG").map(String::as_str), Some("c1"));
        assert!(!map.contains_key(CONSUMER_ID));

        let back = Properties::from_map(&map).unwrap();
        assert_eq!(back, props);
    }

    #[test]
    fn test_missing_correlation_id_is_malformed() {
        let mut map = BTreeMap::new();
        map.insert(MESSAGE_ID.to_string(), "m".to_string());
        let err = Properties::from_map(&map).unwrap_err();
        assert_eq!(err.as_label(), "transport_malformed");
    }

    #[test]
    fn test_addressing_follows_routing_tags() {
        let mut routing = BTreeMap::new();
        routing.insert(Format::Png, ConsumerId::new("c1"));
        let props = Properties::new(EvaluationId::new("e1")).with_routing(routing);
        assert!(props.is_addressed_to(&ConsumerId::new("c1")));
        assert!(!props.is_addressed_to(&ConsumerId::new("c2")));
    }
}
