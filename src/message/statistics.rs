use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::{GroupId, codec};

/// One unit of computed output as seen by a consumer.
///
/// The payload stays encoded; consumers decode it into whatever type they expect with
/// [`Statistics::decode`]. Cloning shares the payload buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statistics {
    group_id: Option<GroupId>,
    payload: Arc<[u8]>,
}

impl Statistics {
    /// Creates a statistics message from an encoded payload.
    pub fn new(payload: impl Into<Arc<[u8]>>, group_id: Option<GroupId>) -> Self {
        Self {
            group_id,
            payload: payload.into(),
        }
    }

    /// Group the message belongs to, if any.
    #[inline]
    pub fn group_id(&self) -> Option<&GroupId> {
        self.group_id.as_ref()
    }

    /// Raw encoded payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decodes the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        codec::decode(&self.payload)
    }
}
