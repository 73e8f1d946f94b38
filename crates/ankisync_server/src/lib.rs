//! # ankisync Server
//!
//! Collection sync server for Anki-compatible clients.
//!
//! This crate provides:
//! - Credential checks and host key issuance (`hostKey`)
//! - Protocol negotiation with legacy-client cutoffs (`meta`)
//! - The sync session state machine (`start` to `finish`)
//! - Per-user exclusive sessions over a shared collection store
//!
//! # Architecture
//!
//! ```text
//! SyncServer::handle(SyncRequest)
//!   -> method and path check, envelope decoding, host key check
//!   -> RequestHandler::handle_*(typed request)
//!   -> SessionRegistry (one locked slot per user)
//!   -> SyncSession step against the user's CollectionStore
//! ```
//!
//! [`SyncServer`] is transport-agnostic. The `ankisync` binary puts an
//! HTTP front on it.
//!
//! # Protocol
//!
//! A sync pass is:
//! 1. `hostKey` with user name and password, once per device
//! 2. `meta` to negotiate; the client stops unless `cont` is true
//! 3. `start` with the client's watermark, returning server deletions
//! 4. `applyGraves` with client deletions, possibly in several chunks
//! 5. `applyChanges` exchanging change sets
//! 6. `sanityCheck2` comparing replica summaries
//! 7. `finish` committing the new watermark

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod negotiator;
mod registry;
mod server;
mod session;

pub use auth::{AuthConfig, Credentials, HostKeyAuthority};
pub use config::{ServerConfig, DEFAULT_PORT};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use negotiator::{MetaOutcome, ProtocolNegotiator};
pub use registry::SessionRegistry;
pub use server::{Endpoint, SyncReply, SyncRequest, SyncServer};
pub use session::{SessionState, SyncSession};
