//! Payload encoding.
//!
//! All payloads (descriptions, status events, statistics, pairs) are JSON. Callers outside
//! this crate never see the encoding except through [`Statistics::decode`](super::Statistics::decode).

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encodes a payload.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

/// Decodes a payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> serde_json::Result<T> {
    serde_json::from_slice(bytes)
}
