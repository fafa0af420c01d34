//! Payload codec capability.
//!
//! The core never interprets payload bytes itself; it asks a [`Codec`] to turn
//! structured values into bytes on publish and back on consume. The default
//! codec is [`JsonCodec`].

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::foundation::error::CodecError;

/// Converts structured payloads to and from bytes.
pub trait Codec: Send + Sync + 'static {
    /// MIME type written to outgoing messages.
    fn content_type(&self) -> &'static str;

    /// Encodes a value.
    fn encode(&self, value: &Value) -> Result<Bytes, CodecError>;

    /// Decodes bytes into a value.
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// A shared, type-erased codec.
pub type BoxedCodec = Arc<dyn Codec>;

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Creates a shared JSON codec.
    pub fn shared() -> BoxedCodec {
        Arc::new(Self)
    }
}

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
