//! Error types for collection store operations.

use std::io;
use thiserror::Error;

/// Result type for collection store operations.
pub type CollectionResult<T> = Result<T, CollectionError>;

/// Errors that can occur while reading or mutating a collection.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stored collection could not be decoded.
    #[error("collection corrupted: {0}")]
    Corrupted(String),

    /// The user name cannot be mapped to a collection.
    #[error("invalid collection name: {0:?}")]
    InvalidName(String),

    /// The store is temporarily unavailable.
    #[error("collection unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for CollectionError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            CollectionError::Io(err.into())
        } else {
            CollectionError::Corrupted(err.to_string())
        }
    }
}
