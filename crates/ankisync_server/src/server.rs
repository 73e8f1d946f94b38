//! Main sync server.

use crate::auth::{AuthConfig, Credentials};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::negotiator::MetaOutcome;
use ankisync_collection::CollectionProvider;
use ankisync_protocol::{HostKeyRequest, Payload};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Path prefix shared by every sync operation.
const PATH_PREFIX: &str = "sync/";

/// A sync operation, addressed as `/sync/<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Credential check and host key issuance.
    HostKey,
    /// Protocol negotiation.
    Meta,
    /// Session start.
    Start,
    /// Client deletions.
    ApplyGraves,
    /// Change set exchange.
    ApplyChanges,
    /// Replica summary comparison.
    SanityCheck2,
    /// Commit and end the session.
    Finish,
    /// Note types above the watermark.
    GetModels,
    /// Decks and deck configs above the watermark.
    GetDecks,
    /// Tags above the watermark.
    GetTags,
}

impl Endpoint {
    /// All operations.
    pub const ALL: [Endpoint; 10] = [
        Endpoint::HostKey,
        Endpoint::Meta,
        Endpoint::Start,
        Endpoint::ApplyGraves,
        Endpoint::ApplyChanges,
        Endpoint::SanityCheck2,
        Endpoint::Finish,
        Endpoint::GetModels,
        Endpoint::GetDecks,
        Endpoint::GetTags,
    ];

    /// Returns the operation name as it appears in the path.
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::HostKey => "hostKey",
            Endpoint::Meta => "meta",
            Endpoint::Start => "start",
            Endpoint::ApplyGraves => "applyGraves",
            Endpoint::ApplyChanges => "applyChanges",
            Endpoint::SanityCheck2 => "sanityCheck2",
            Endpoint::Finish => "finish",
            Endpoint::GetModels => "getModels",
            Endpoint::GetDecks => "getDecks",
            Endpoint::GetTags => "getTags",
        }
    }

    /// Resolves a request path such as `/sync/meta`.
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.trim_start_matches('/').trim_end_matches('/');
        path.strip_prefix(PATH_PREFIX)?.parse().ok()
    }

    /// Returns true if the caller must present a host key.
    pub fn requires_key(&self) -> bool {
        !matches!(self, Endpoint::HostKey)
    }
}

impl FromStr for Endpoint {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::ALL
            .iter()
            .copied()
            .find(|e| e.name() == s)
            .ok_or_else(|| ServerError::NotFound(format!("unknown operation {:?}", s)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A transport-independent sync request.
///
/// The HTTP front fills this from the multipart form fields `k` (host
/// key), `c` (compression flag) and `data` (body).
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Presented host key.
    pub host_key: Option<String>,
    /// Whether `data` is gzip-compressed.
    pub compressed: bool,
    /// Request body; absent means `{}`.
    pub data: Option<Vec<u8>>,
}

impl SyncRequest {
    /// Creates a POST request for `path`.
    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: "POST".into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the host key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.host_key = Some(key.into());
        self
    }

    /// Sets an uncompressed body.
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self.compressed = false;
        self
    }

    /// Sets a gzip-compressed body.
    pub fn with_compressed_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self.compressed = true;
        self
    }
}

/// A transport-independent reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReply {
    /// HTTP status code.
    pub status: u16,
    /// Whether `body` is JSON.
    pub is_json: bool,
    /// Response body.
    pub body: Vec<u8>,
}

impl SyncReply {
    /// A 200 reply carrying `value` as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn json<T: Serialize>(value: &T) -> ServerResult<Self> {
        let body = serde_json::to_vec(value).map_err(|e| ServerError::Internal(e.to_string()))?;
        Ok(Self {
            status: 200,
            is_json: true,
            body,
        })
    }

    /// A reply with no body.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            is_json: false,
            body: Vec::new(),
        }
    }

    /// A plain text error reply.
    pub fn error(err: &ServerError) -> Self {
        Self {
            status: err.status_code(),
            is_json: false,
            body: err.to_string().into_bytes(),
        }
    }

    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The sync server.
///
/// Routes requests to the handler: checks the method, resolves the path,
/// decodes the envelope, authenticates, and serializes the typed result.
/// It knows nothing about sockets; an HTTP front passes [`SyncRequest`]s
/// in and writes [`SyncReply`]s out.
///
/// # Example
///
/// ```
/// use ankisync_collection::MemoryProvider;
/// use ankisync_server::{Credentials, ServerConfig, SyncRequest, SyncServer};
/// use std::sync::Arc;
///
/// let mut credentials = Credentials::new();
/// credentials.add_user("alice", "secret").unwrap();
/// let server = SyncServer::new(
///     ServerConfig::default(),
///     credentials,
///     Arc::new(MemoryProvider::new()),
/// );
///
/// let reply = server.handle(
///     SyncRequest::post("/sync/hostKey").with_data(r#"{"u":"alice","p":"secret"}"#),
/// );
/// assert_eq!(reply.status, 200);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(
        config: ServerConfig,
        credentials: Credentials,
        provider: Arc<dyn CollectionProvider>,
    ) -> Self {
        Self::from_context(HandlerContext::new(config, credentials, provider))
    }

    /// Creates a sync server with an explicit host key secret.
    pub fn with_auth(
        config: ServerConfig,
        credentials: Credentials,
        auth: AuthConfig,
        provider: Arc<dyn CollectionProvider>,
    ) -> Self {
        Self::from_context(HandlerContext::with_auth(config, credentials, auth, provider))
    }

    fn from_context(context: HandlerContext) -> Self {
        let context = Arc::new(context);
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the typed handler.
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Number of users with an unfinished session.
    pub fn active_sessions(&self) -> usize {
        self.context.registry().active_sessions()
    }

    /// Handles one request. Failures become error replies.
    pub fn handle(&self, request: SyncRequest) -> SyncReply {
        let path = request.path.clone();
        match self.dispatch(request) {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_server_error() {
                    warn!("{} failed: {}", path, e);
                } else {
                    debug!("{} rejected: {}", path, e);
                }
                SyncReply::error(&e)
            }
        }
    }

    fn dispatch(&self, request: SyncRequest) -> ServerResult<SyncReply> {
        if !request.method.eq_ignore_ascii_case("POST") {
            return Err(ServerError::NotFound(format!(
                "{} {}",
                request.method, request.path
            )));
        }
        let endpoint = Endpoint::from_path(&request.path)
            .ok_or_else(|| ServerError::NotFound(request.path.clone()))?;

        // The key is checked before the body is inflated.
        let user = if endpoint.requires_key() {
            self.handler.authenticate(request.host_key.as_deref())?
        } else {
            String::new()
        };

        let payload = match &request.data {
            Some(data) => Payload::decode(data, request.compressed, self.config().max_payload_bytes)?,
            None => Payload::empty(),
        };

        let handler = &self.handler;
        match endpoint {
            Endpoint::HostKey => {
                let credentials: HostKeyRequest = payload.into_request().map_err(|_| {
                    ServerError::AuthenticationFailed("must pass credentials".into())
                })?;
                SyncReply::json(&handler.handle_host_key(credentials)?)
            }
            Endpoint::Meta => match handler.handle_meta(&user, payload.into_request()?)? {
                MetaOutcome::UpgradeRequired => Ok(SyncReply::empty(501)),
                MetaOutcome::Refused(refusal) => SyncReply::json(&refusal),
                MetaOutcome::Accepted(meta) => SyncReply::json(&meta),
            },
            Endpoint::Start => SyncReply::json(&handler.handle_start(&user, payload.into_request()?)?),
            Endpoint::ApplyGraves => {
                SyncReply::json(&handler.handle_apply_graves(&user, payload.into_request()?)?)
            }
            Endpoint::ApplyChanges => {
                SyncReply::json(&handler.handle_apply_changes(&user, payload.into_request()?)?)
            }
            Endpoint::SanityCheck2 => {
                SyncReply::json(&handler.handle_sanity_check(&user, payload.into_request()?)?)
            }
            Endpoint::Finish => SyncReply::json(&handler.handle_finish(&user)?),
            Endpoint::GetModels => SyncReply::json(&handler.handle_get_models(&user)?),
            Endpoint::GetDecks => SyncReply::json(&handler.handle_get_decks(&user)?),
            Endpoint::GetTags => SyncReply::json(&handler.handle_get_tags(&user)?),
        }
    }
}
