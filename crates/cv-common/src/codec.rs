//! Content payload codec
//!
//! Payloads are stored as MessagePack with named map keys, so a decoded blob
//! reproduces the original structured value without any external schema.

use crate::error::Result;
use serde_json::Value;

/// Encode a structured value into its compact binary form
pub fn serialize(value: &Value) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode bytes produced by [`serialize`] back into a structured value
pub fn deserialize(bytes: &[u8]) -> Result<Value> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Report whether `bytes` decode cleanly
pub fn validate(bytes: &[u8]) -> bool {
    deserialize(bytes).is_ok()
}
