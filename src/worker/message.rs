//! Serialized message payloads
//!
//! A message is encoded once, at post time, so the sender and the receiver
//! never share memory. JSON is the wire format: objects, arrays, strings,
//! numbers, booleans and null survive the trip, anything else is rejected.

use serde::Serialize;
use serde_json::json;

use super::error::SerializationError;
use crate::script::Value;

/// An immutable serialized payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message(Box<[u8]>);

impl Message {
    /// Serialize `value` into a new message
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, SerializationError> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self(bytes.into_boxed_slice()))
    }

    /// Deserialize into a fresh value, independent of the sender's copy
    pub fn decode(&self) -> Result<Value, SerializationError> {
        Ok(serde_json::from_slice(&self.0)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The single argument handed to a message callback: `{ data: value }`
pub fn message_event(data: Value) -> Value {
    json!({ "data": data })
}
