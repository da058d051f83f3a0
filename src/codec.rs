//! Payload serialization policy: compact JSON with a size ceiling.
//!
//! The codec is applied uniformly by the client regardless of transport.
//! Decoding falls back to the raw string form so a malformed message can
//! still be leased and acknowledged instead of wedging the queue.

use crate::error::{Error, Result};
use serde_json::Value;

/// Encodes and decodes queue payloads.
#[derive(Debug, Clone)]
pub struct PayloadCodec {
    max_encoded_len: usize,
}

impl PayloadCodec {
    pub fn new(max_encoded_len: usize) -> Self {
        Self { max_encoded_len }
    }

    /// Encode a payload as compact JSON.
    ///
    /// Fails with [`Error::Serialization`] if the payload cannot be encoded
    /// or the encoded form exceeds the configured maximum.
    pub fn encode(&self, payload: &Value) -> Result<String> {
        let encoded =
            serde_json::to_string(payload).map_err(|e| Error::Serialization(e.to_string()))?;
        if encoded.len() > self.max_encoded_len {
            return Err(Error::Serialization(format!(
                "encoded payload is {} bytes, over the {} byte limit",
                encoded.len(),
                self.max_encoded_len
            )));
        }
        Ok(encoded)
    }

    /// Decode a raw message body, falling back to the undecoded string.
    pub fn decode(&self, raw: &str) -> Value {
        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
    }

    /// Whether a payload would be accepted by [`encode`](Self::encode).
    pub fn fits(&self, payload: &Value) -> bool {
        self.encode(payload).is_ok()
    }
}
