//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The request payload could not be decompressed.
    #[error("failed to decompress payload: {0}")]
    Decompression(#[from] std::io::Error),

    /// The payload exceeded the configured size limit.
    #[error("payload too large: limit is {limit} bytes")]
    PayloadTooLarge {
        /// The configured limit.
        limit: usize,
    },

    /// The payload was not structured data but the operation requires fields.
    #[error("expected a structured payload, got {len} opaque bytes")]
    Unstructured {
        /// Length of the opaque payload.
        len: usize,
    },

    /// A required field was missing or had the wrong type.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// A client version string could not be parsed.
    #[error("invalid client version {input:?}: {reason}")]
    InvalidVersion {
        /// The offending input.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

impl ProtocolError {
    pub(crate) fn invalid_version(input: &str, reason: &'static str) -> Self {
        Self::InvalidVersion {
            input: input.to_string(),
            reason,
        }
    }
}
