//! Value encodings.
//!
//! Two encodings, chosen consistently per medium: bus payloads are UTF-8
//! JSON (the wire contract), key-value store entries are MsgPack maps
//! (compact, self-describing).

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::event::Event;

/// Errors raised while encoding or decoding values.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("MsgPack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("MsgPack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encodes a store value as a MsgPack map (field names preserved).
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decodes a store value previously written by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Serializes an event for the bus.
pub fn to_wire(event: &Event) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(event)?)
}

/// Deserializes an event received from the bus.
pub fn from_wire(bytes: &[u8]) -> Result<Event, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}
