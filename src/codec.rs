//! Codec Module
//!
//! Converts typed values to and from the bytes handed to storage adapters.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

/// Value <-> bytes conversion.
///
/// Implementations must satisfy `decode(encode(v)) == v` for every value
/// they accept. `key` is only used to label decode failures.
pub trait Codec: Send + Sync + 'static {
    fn encode<V: Serialize>(&self, value: &V) -> Result<Bytes>;

    fn decode<V: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> Result<V>;
}

/// JSON wire format (serde_json).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<V: Serialize>(&self, value: &V) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CacheError::UnencodableValue(e.to_string()))
    }

    fn decode<V: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> Result<V> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::CorruptValue {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Compact binary wire format (bincode).
///
/// Does not support self-describing types such as `serde_json::Value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<V: Serialize>(&self, value: &V) -> Result<Bytes> {
        bincode::serialize(value)
            .map(Bytes::from)
            .map_err(|e| CacheError::UnencodableValue(e.to_string()))
    }

    fn decode<V: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> Result<V> {
        bincode::deserialize(bytes).map_err(|e| CacheError::CorruptValue {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}
