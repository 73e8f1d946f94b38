//! Protocol negotiation (`meta`).
//!
//! Decides, before any session exists, whether a client may sync at all:
//!
//! | condition | outcome |
//! |---|---|
//! | client family and version below its cutoff | [`MetaOutcome::UpgradeRequired`] |
//! | protocol version newer than the server's | [`MetaOutcome::Refused`] |
//! | protocol version below 9 on a v2+ scheduler collection | [`MetaOutcome::Refused`] |
//! | otherwise | [`MetaOutcome::Accepted`] |

use crate::error::ServerResult;
use ankisync_collection::CollectionStore;
use ankisync_protocol::{now_secs, ClientDescriptor, MetaRefusal, MetaRequest, ServerMeta};
use tracing::{debug, info};

/// Oldest protocol version that understands the v2 scheduler.
const MIN_VERSION_FOR_V2_SCHEDULER: u32 = 9;

/// Result of negotiating with a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaOutcome {
    /// The client is too old to speak this protocol at all.
    UpgradeRequired,
    /// The client should stop gracefully.
    Refused(MetaRefusal),
    /// The client may start a session.
    Accepted(ServerMeta),
}

impl MetaOutcome {
    /// Returns true if the client may continue.
    pub fn is_accepted(&self) -> bool {
        matches!(self, MetaOutcome::Accepted(_))
    }
}

/// Gatekeeper for the `meta` operation.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolNegotiator {
    server_version: u32,
}

impl ProtocolNegotiator {
    /// Creates a negotiator for the given server protocol version.
    pub fn new(server_version: u32) -> Self {
        Self { server_version }
    }

    /// Returns the protocol version the server speaks.
    pub fn server_version(&self) -> u32 {
        self.server_version
    }

    /// Negotiates with a client.
    ///
    /// Only an accepted client touches the store beyond reading the
    /// scheduler generation; acceptance opens the media index if needed.
    /// An empty `cv` skips the client cutoff check.
    ///
    /// # Errors
    ///
    /// Returns an error if `cv` is present but cannot be parsed, or if the
    /// store cannot report its media usn.
    pub fn negotiate(
        &self,
        request: &MetaRequest,
        store: &mut dyn CollectionStore,
    ) -> ServerResult<MetaOutcome> {
        let cv = request.client_version.trim();
        if !cv.is_empty() {
            let client = ClientDescriptor::parse(cv)?;
            if client.is_legacy() {
                info!("client {} {} must upgrade", client.client, client.version);
                return Ok(MetaOutcome::UpgradeRequired);
            }
        }

        let version = request.protocol_version;
        if version > self.server_version {
            info!(
                "refusing protocol version {} (server speaks {})",
                version, self.server_version
            );
            return Ok(MetaOutcome::Refused(MetaRefusal::new(format!(
                "Your client is using unsupported sync protocol ({}, supported version: {})",
                version, self.server_version
            ))));
        }

        let scheduler = store.scheduler_version();
        if version < MIN_VERSION_FOR_V2_SCHEDULER && scheduler >= 2 {
            info!(
                "refusing protocol version {} for a v{} scheduler collection",
                version, scheduler
            );
            return Ok(MetaOutcome::Refused(MetaRefusal::new(format!(
                "Your client doesn't support the v{} scheduler.",
                scheduler
            ))));
        }

        let meta = ServerMeta {
            scm: store.schema_modified(),
            ts: now_secs(),
            modified: store.modified(),
            usn: store.usn(),
            musn: store.media_last_usn()?,
            msg: String::new(),
            cont: true,
        };
        debug!("accepted client {:?} at usn {}", cv, meta.usn);
        Ok(MetaOutcome::Accepted(meta))
    }
}
