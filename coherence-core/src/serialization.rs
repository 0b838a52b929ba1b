//! The serialization boundary between typed handles and type-erased wire
//! payloads.
//!
//! Keys and values travel over the wire as JSON bytes, matching the grid's
//! native object format. The contract is a deterministic round-trip:
//! `decode(encode(v)) == v` for every supported type. Anything implementing
//! serde's `Serialize`/`Deserialize` — primitives, strings, sequences,
//! mappings, and derived records — is a supported key or value type.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CoherenceError, Result};

/// Encodes a value into its wire representation.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|err| CoherenceError::Decode(format!("failed to encode value: {err}")))
}

/// Decodes a wire payload into the declared target type.
///
/// The target type is always supplied by the caller (the typed handle), never
/// inferred from payload content.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|err| CoherenceError::Decode(format!("failed to decode value: {err}")))
}
