//! Request handlers for sync endpoints.

use crate::auth::{AuthConfig, Credentials, HostKeyAuthority};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::negotiator::{MetaOutcome, ProtocolNegotiator};
use crate::registry::SessionRegistry;
use ankisync_collection::CollectionProvider;
use ankisync_protocol::{
    ApplyChangesRequest, ApplyGravesRequest, ChangeSet, DeckProjection, Graves, HostKeyRequest,
    HostKeyResponse, MetaRequest, Record, SanityCheckRequest, SanityCheckResponse, StartRequest,
};
use std::sync::Arc;
use tracing::warn;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    credentials: Credentials,
    authority: HostKeyAuthority,
    negotiator: ProtocolNegotiator,
    registry: SessionRegistry,
}

impl HandlerContext {
    /// Creates a new handler context with a random host key secret.
    pub fn new(
        config: ServerConfig,
        credentials: Credentials,
        provider: Arc<dyn CollectionProvider>,
    ) -> Self {
        let auth = AuthConfig::random().with_expiry(config.host_key_expiry);
        Self::with_auth(config, credentials, auth, provider)
    }

    /// Creates a new handler context with an explicit auth configuration.
    pub fn with_auth(
        config: ServerConfig,
        credentials: Credentials,
        auth: AuthConfig,
        provider: Arc<dyn CollectionProvider>,
    ) -> Self {
        let negotiator = ProtocolNegotiator::new(config.sync_version);
        let registry = SessionRegistry::new(
            provider,
            config.merge_policy,
            config.session_idle_timeout,
        );
        Self {
            config,
            credentials,
            authority: HostKeyAuthority::new(auth),
            negotiator,
            registry,
        }
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

/// Handler for sync requests.
///
/// Each method takes an already decoded, typed request. Everything but
/// [`Self::handle_host_key`] expects the caller to have resolved the host
/// key to a user with [`Self::authenticate`].
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Checks credentials and issues a host key.
    pub fn handle_host_key(&self, request: HostKeyRequest) -> ServerResult<HostKeyResponse> {
        if !self
            .context
            .credentials
            .verify(&request.username, &request.password)
        {
            warn!("rejected credentials for {:?}", request.username);
            return Err(ServerError::AuthenticationFailed(
                "credentials didn't work".into(),
            ));
        }
        let key = self.context.authority.issue(&request.username)?;
        Ok(HostKeyResponse { key })
    }

    /// Resolves a presented host key to its user.
    pub fn authenticate(&self, host_key: Option<&str>) -> ServerResult<String> {
        self.context.authority.resolve(host_key)
    }

    /// Handles `meta`.
    pub fn handle_meta(&self, user: &str, request: MetaRequest) -> ServerResult<MetaOutcome> {
        let negotiator = self.context.negotiator;
        self.context
            .registry
            .with_store(user, |store| negotiator.negotiate(&request, store))
    }

    /// Handles `start`.
    pub fn handle_start(&self, user: &str, request: StartRequest) -> ServerResult<Graves> {
        self.context.registry.begin(user, |session, store| {
            session.start(
                store,
                request.min_usn,
                request.client_newer,
                request.graves.as_ref(),
            )
        })
    }

    /// Handles `applyGraves`.
    pub fn handle_apply_graves(&self, user: &str, request: ApplyGravesRequest) -> ServerResult<()> {
        self.context
            .registry
            .with_session(user, "applyGraves", |session, store| {
                session.apply_graves(store, &request.chunk)
            })
    }

    /// Handles `applyChanges`.
    pub fn handle_apply_changes(
        &self,
        user: &str,
        request: ApplyChangesRequest,
    ) -> ServerResult<ChangeSet> {
        self.context
            .registry
            .with_session(user, "applyChanges", |session, store| {
                session.apply_changes(store, request.changes)
            })
    }

    /// Handles `sanityCheck2`.
    pub fn handle_sanity_check(
        &self,
        user: &str,
        request: SanityCheckRequest,
    ) -> ServerResult<SanityCheckResponse> {
        self.context
            .registry
            .with_session(user, "sanityCheck2", |session, store| {
                session.sanity_check(store, request.client)
            })
    }

    /// Handles `finish`. Returns the new modification time.
    pub fn handle_finish(&self, user: &str) -> ServerResult<i64> {
        self.context
            .registry
            .with_session(user, "finish", |session, store| session.finish(store))
    }

    /// Handles `getModels`.
    pub fn handle_get_models(&self, user: &str) -> ServerResult<Vec<Record>> {
        self.context
            .registry
            .with_session(user, "getModels", |session, store| session.models(store))
    }

    /// Handles `getDecks`.
    pub fn handle_get_decks(&self, user: &str) -> ServerResult<DeckProjection> {
        self.context
            .registry
            .with_session(user, "getDecks", |session, store| session.decks(store))
    }

    /// Handles `getTags`.
    pub fn handle_get_tags(&self, user: &str) -> ServerResult<Vec<String>> {
        self.context
            .registry
            .with_session(user, "getTags", |session, store| session.tags(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ankisync_collection::{InMemoryCollection, MemoryProvider, RecordKind};
    use ankisync_protocol::{GraveKind, SanitySummary};

    fn create_handler(provider: MemoryProvider) -> RequestHandler {
        let mut credentials = Credentials::new();
        credentials.add_user("alice", "secret").unwrap();
        let context = Arc::new(HandlerContext::new(
            ServerConfig::default(),
            credentials,
            Arc::new(provider),
        ));
        RequestHandler::new(context)
    }

    fn login(handler: &RequestHandler) -> String {
        let response = handler
            .handle_host_key(HostKeyRequest {
                username: "alice".into(),
                password: "secret".into(),
            })
            .unwrap();
        handler.authenticate(Some(&response.key)).unwrap()
    }

    #[test]
    fn host_key_success() {
        let handler = create_handler(MemoryProvider::new());
        assert_eq!(login(&handler), "alice");
    }

    #[test]
    fn host_key_bad_password() {
        let handler = create_handler(MemoryProvider::new());
        let result = handler.handle_host_key(HostKeyRequest {
            username: "alice".into(),
            password: "wrong".into(),
        });
        assert!(matches!(result, Err(ServerError::AuthenticationFailed(_))));
    }

    #[test]
    fn meta_accepts_current_client() {
        let handler = create_handler(MemoryProvider::new());
        let user = login(&handler);
        let outcome = handler
            .handle_meta(
                &user,
                MetaRequest {
                    protocol_version: 10,
                    client_version: "ankidesktop,2.1.15,lin".into(),
                },
            )
            .unwrap();
        assert!(outcome.is_accepted());
    }

    #[test]
    fn sync_pass() {
        let mut seed = InMemoryCollection::new().with_usn(2);
        seed.put(RecordKind::Model, Record::new(1, 10, 0));
        seed.put(RecordKind::Card, Record::new(5, 10, 0));
        seed.delete(GraveKind::Card, 5);
        let handler = create_handler(MemoryProvider::new().with_collection("alice", seed));
        let user = login(&handler);

        let graves = handler
            .handle_start(
                &user,
                StartRequest {
                    min_usn: 0,
                    client_newer: false,
                    graves: None,
                },
            )
            .unwrap();
        assert_eq!(graves.cards, vec![5]);

        handler
            .handle_apply_graves(&user, ApplyGravesRequest { chunk: Graves::new() })
            .unwrap();
        let changes = handler
            .handle_apply_changes(
                &user,
                ApplyChangesRequest {
                    changes: ChangeSet::default(),
                },
            )
            .unwrap();
        assert_eq!(changes.models.len(), 1);
        assert!(changes.conf.is_some());

        assert_eq!(handler.handle_get_models(&user).unwrap().len(), 1);
        assert!(handler.handle_get_tags(&user).unwrap().is_empty());
        assert!(handler.handle_get_decks(&user).unwrap().decks().is_empty());

        let response = handler
            .handle_sanity_check(
                &user,
                SanityCheckRequest {
                    client: SanitySummary {
                        graves: 1,
                        models: 1,
                        ..SanitySummary::default()
                    },
                },
            )
            .unwrap();
        assert!(response.is_ok());
        assert!(handler.handle_finish(&user).unwrap() > 0);
        assert!(handler.handle_finish(&user).is_err());
    }
}
