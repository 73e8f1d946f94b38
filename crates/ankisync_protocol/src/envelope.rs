//! Request envelope decoding.
//!
//! A request body is optionally gzip-compressed. Once inflated it is either
//! JSON, which becomes a [`Payload::Structured`] value, or anything else,
//! which is kept as opaque bytes under [`Payload::Raw`].

use crate::error::{ProtocolError, ProtocolResult};
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::io::Read;

/// A decoded request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The body parsed as JSON.
    Structured(Value),
    /// The body was not JSON; kept verbatim.
    Raw(Vec<u8>),
}

impl Payload {
    /// Payload used when a request carries no body at all.
    pub fn empty() -> Self {
        Payload::Structured(Value::Object(Map::new()))
    }

    /// Decodes a request body.
    ///
    /// # Arguments
    ///
    /// * `data` - The body as received
    /// * `compressed` - Whether the body is gzip-compressed
    /// * `limit` - Maximum size in bytes, checked before and after inflation
    ///
    /// # Errors
    ///
    /// Returns an error if the body is too large or cannot be inflated.
    /// A body that is not JSON is not an error.
    pub fn decode(data: &[u8], compressed: bool, limit: usize) -> ProtocolResult<Self> {
        if data.len() > limit {
            return Err(ProtocolError::PayloadTooLarge { limit });
        }

        let inflated;
        let bytes = if compressed {
            let mut buf = Vec::new();
            GzDecoder::new(data)
                .take(limit as u64 + 1)
                .read_to_end(&mut buf)?;
            if buf.len() > limit {
                return Err(ProtocolError::PayloadTooLarge { limit });
            }
            inflated = buf;
            inflated.as_slice()
        } else {
            data
        };

        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Ok(Payload::Structured(value)),
            Err(_) => Ok(Payload::Raw(bytes.to_vec())),
        }
    }

    /// Returns true if the payload parsed as JSON.
    pub fn is_structured(&self) -> bool {
        matches!(self, Payload::Structured(_))
    }

    /// Converts the payload into a typed request.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Unstructured`] for opaque payloads and
    /// [`ProtocolError::Malformed`] when a required field is missing or
    /// has the wrong type.
    pub fn into_request<T: DeserializeOwned>(self) -> ProtocolResult<T> {
        match self {
            Payload::Structured(value) => {
                serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
            }
            Payload::Raw(bytes) => Err(ProtocolError::Unstructured { len: bytes.len() }),
        }
    }
}
