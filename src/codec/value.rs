//! Value Codec Module
//!
//! Serializes cache values to bytes and back, with a text fallback for
//! payloads that were never written by the codec.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::error::{CacheError, Result};

/// Leading bytes of every MessagePack payload written by this crate.
///
/// 0xC1 is never a valid UTF-8 lead byte, so plain text cannot be mistaken
/// for a codec payload.
const MAGIC: [u8; 4] = [0xC1, b'r', b'c', 0x01];

// == Codec Error ==
#[derive(Error, Debug)]
#[error("{0}")]
pub struct CodecError(pub String);

// == Value Codec Trait ==
/// Pluggable object codec: value to bytes and back.
pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &Value) -> std::result::Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> std::result::Result<Value, CodecError>;
}

// == MessagePack Codec ==
/// Default codec: a version-tagged MessagePack payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackCodec;

impl ValueCodec for MessagePackCodec {
    fn encode(&self, value: &Value) -> std::result::Result<Vec<u8>, CodecError> {
        let payload = rmp_serde::to_vec(value).map_err(|e| CodecError(e.to_string()))?;
        let mut bytes = Vec::with_capacity(MAGIC.len() + payload.len());
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> std::result::Result<Value, CodecError> {
        let payload = bytes
            .strip_prefix(&MAGIC)
            .ok_or_else(|| CodecError("missing codec header".to_string()))?;
        rmp_serde::from_slice(payload).map_err(|e| CodecError(e.to_string()))
    }
}

// == Value Serializer ==
/// Wraps a codec with the crate's error mapping and text fallback.
#[derive(Clone)]
pub struct ValueSerializer {
    codec: Arc<dyn ValueCodec>,
}

impl ValueSerializer {
    pub fn new(codec: Arc<dyn ValueCodec>) -> Self {
        Self { codec }
    }

    /// Encodes a value for storage. Codec failures surface as
    /// `CacheError::Serialization`.
    pub fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        self.codec
            .encode(value)
            .map_err(|e| CacheError::Serialization(e.0))
    }

    /// Decodes stored bytes.
    ///
    /// Bytes the codec rejects are returned as a string when they are valid
    /// UTF-8. Only bytes that are neither fail.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        match self.codec.decode(bytes) {
            Ok(value) => Ok(value),
            Err(codec_err) => match std::str::from_utf8(bytes) {
                Ok(text) => Ok(Value::String(text.to_string())),
                Err(_) => Err(CacheError::Deserialization(codec_err.0)),
            },
        }
    }
}

impl Default for ValueSerializer {
    fn default() -> Self {
        Self::new(Arc::new(MessagePackCodec))
    }
}

impl fmt::Debug for ValueSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueSerializer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_value_survives() {
        let serializer = ValueSerializer::default();
        let value = json!({"id": 1, "tags": ["a", "b"], "nested": {"ok": true}});

        let bytes = serializer.serialize(&value).unwrap();
        assert!(bytes.starts_with(&MAGIC));
        assert_eq!(serializer.deserialize(&bytes).unwrap(), value);
    }

    #[test]
    fn test_plain_text_falls_back_to_string() {
        let serializer = ValueSerializer::default();
        let value = serializer.deserialize(b"written by someone else").unwrap();
        assert_eq!(value, json!("written by someone else"));
    }

    #[test]
    fn test_truncated_payload_fails() {
        let serializer = ValueSerializer::default();
        // header intact, body truncated, and the header is not UTF-8
        let mut bytes = serializer.serialize(&json!("hello world")).unwrap();
        bytes.truncate(MAGIC.len() + 2);
        assert!(matches!(
            serializer.deserialize(&bytes),
            Err(CacheError::Deserialization(_))
        ));
    }

    #[test]
    fn test_binary_garbage_fails() {
        let serializer = ValueSerializer::default();
        let result = serializer.deserialize(&[0xff, 0xfe, 0x00]);
        assert!(matches!(result, Err(CacheError::Deserialization(_))));
    }

    #[test]
    fn test_codec_failure_surfaces_as_serialization_error() {
        struct Refusing;
        impl ValueCodec for Refusing {
            fn encode(&self, _: &Value) -> std::result::Result<Vec<u8>, CodecError> {
                Err(CodecError("not representable".to_string()))
            }
            fn decode(&self, _: &[u8]) -> std::result::Result<Value, CodecError> {
                Err(CodecError("never".to_string()))
            }
        }

        let serializer = ValueSerializer::new(Arc::new(Refusing));
        let result = serializer.serialize(&json!(1));
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }
}
