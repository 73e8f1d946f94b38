//! # ankisync Protocol
//!
//! Wire types for the collection sync protocol.
//!
//! This crate provides:
//! - [`Usn`] watermarks and the unsynced sentinel
//! - [`Grave`] deletion records and the [`Graves`] wire set
//! - [`ChangeSet`] payloads exchanged by `applyChanges`
//! - Typed per-operation request and response messages
//! - [`ClientDescriptor`] parsing of client version strings
//! - [`Payload`] decoding of request envelopes (optional gzip + JSON)
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Example
//!
//! ```rust
//! use ankisync_protocol::{ClientDescriptor, Payload, StartRequest};
//!
//! let client = ClientDescriptor::parse("ankidesktop,2.0.26,lin").unwrap();
//! assert!(client.is_legacy());
//!
//! let payload = Payload::decode(br#"{"minUsn": 0, "lnewer": true}"#, false, 1024).unwrap();
//! let start: StartRequest = payload.into_request().unwrap();
//! assert_eq!(start.min_usn, 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changes;
mod envelope;
mod error;
mod grave;
mod messages;
mod types;
mod version;

pub use changes::{ChangeSet, DeckProjection, Record, RevlogEntry};
pub use envelope::Payload;
pub use error::{ProtocolError, ProtocolResult};
pub use grave::{Grave, GraveKind, Graves};
pub use messages::{
    ApplyChangesRequest, ApplyGravesRequest, HostKeyRequest, HostKeyResponse, MetaRefusal,
    MetaRequest, SanityCheckRequest, SanityCheckResponse, SanitySummary, ServerMeta,
    StartRequest,
};
pub use types::{now_millis, now_secs, ObjectId, Usn, UNSYNCED_USN};
pub use version::{ClientDescriptor, ClientVersion, Prerelease, PrereleaseKind};

/// Highest sync protocol version this implementation speaks.
pub const SYNC_VERSION: u32 = 10;
