//! Attribute value encoding.
//!
//! The grid stores attribute values as opaque bytes and indexes them
//! byte-for-byte, so the same codec must be used on every member that
//! writes or queries a map.

use crate::error::{GridError, Result};
use serde_json::Value;

pub trait AttributeCodec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// Stores values as compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl AttributeCodec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| {
            GridError::Serialization(format!("attribute is not valid JSON: {}", e))
        })
    }
}
