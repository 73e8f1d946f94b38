//! Error types for the sync server.

use crate::session::SessionState;
use ankisync_collection::CollectionError;
use ankisync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
///
/// A protocol refusal or a sanity mismatch is not an error: both are
/// successful responses the client branches on.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Credentials were missing or wrong.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The host key was missing, unknown or expired.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Unknown operation or wrong method.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation was called in a state that does not allow it.
    #[error("{operation} is not allowed in state {state}")]
    InvalidSessionState {
        /// State the session was in.
        state: SessionState,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// Another session for the same user is still active.
    #[error("a sync is already in progress for {0}")]
    SessionBusy(String),

    /// The request payload could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The collection store failed.
    #[error("collection error: {0}")]
    Collection(#[from] CollectionError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the HTTP status code this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_)
            | ServerError::Protocol(_)
            | ServerError::InvalidSessionState { .. } => 400,
            ServerError::AuthenticationFailed(_) | ServerError::NotAuthorized(_) => 403,
            ServerError::NotFound(_) => 404,
            ServerError::SessionBusy(_) => 409,
            ServerError::Collection(CollectionError::InvalidName(_)) => 403,
            ServerError::Collection(_) | ServerError::Internal(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Returns true if the client may retry the whole sync from `start`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServerError::SessionBusy(_))
            || matches!(self, ServerError::Collection(e) if !matches!(e, CollectionError::InvalidName(_)))
    }
}
