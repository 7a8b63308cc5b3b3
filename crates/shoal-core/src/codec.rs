//! Document codec: MessagePack with string-keyed maps.
//!
//! Stored document bytes are exactly the encoding produced here; `find`
//! decodes them back with the same codec, so the engine and the wire layer
//! always agree on the byte-level representation.

use serde_json::Value;

use crate::error::CodecError;

/// Encode a structured value into opaque document bytes.
pub fn encode_doc(value: &Value) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode stored document bytes back into a structured value.
pub fn decode_doc(bytes: &[u8]) -> Result<Value, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
