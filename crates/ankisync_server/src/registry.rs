//! Per-user collection slots and session leases.
//!
//! Each user gets one slot holding their opened collection and at most one
//! sync session. The slot is behind its own mutex: requests for one user
//! run one at a time, requests for different users run in parallel.

use crate::error::{ServerError, ServerResult};
use crate::session::{SessionState, SyncSession};
use ankisync_collection::{CollectionProvider, CollectionStore, MergePolicy};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct UserSlot {
    store: Box<dyn CollectionStore>,
    session: Option<SyncSession>,
    last_activity: Instant,
}

impl UserSlot {
    fn is_busy(&self, idle_timeout: Duration) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.state().is_active())
            && self.last_activity.elapsed() < idle_timeout
    }
}

/// Hands out exclusive access to users' collections and sessions.
pub struct SessionRegistry {
    provider: Arc<dyn CollectionProvider>,
    policy: MergePolicy,
    idle_timeout: Duration,
    slots: RwLock<HashMap<String, Arc<Mutex<UserSlot>>>>,
}

impl SessionRegistry {
    /// Creates a registry that opens collections through `provider`.
    pub fn new(
        provider: Arc<dyn CollectionProvider>,
        policy: MergePolicy,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            policy,
            idle_timeout,
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, user: &str) -> ServerResult<Arc<Mutex<UserSlot>>> {
        if let Some(slot) = self.slots.read().get(user) {
            return Ok(Arc::clone(slot));
        }

        // Opened without the map lock held; a slot inserted meanwhile wins.
        let store = self.provider.open(user)?;
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get(user) {
            return Ok(Arc::clone(slot));
        }
        debug!("opened collection for {}", user);
        let slot = Arc::new(Mutex::new(UserSlot {
            store,
            session: None,
            last_activity: Instant::now(),
        }));
        slots.insert(user.to_string(), Arc::clone(&slot));
        Ok(slot)
    }

    /// Runs `f` against the user's collection, outside any session.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be opened, or whatever
    /// `f` returns.
    pub fn with_store<T>(
        &self,
        user: &str,
        f: impl FnOnce(&mut dyn CollectionStore) -> ServerResult<T>,
    ) -> ServerResult<T> {
        let slot = self.slot(user)?;
        let mut slot = slot.lock();
        f(slot.store.as_mut())
    }

    /// Begins a new session for `user` and runs `f` on it.
    ///
    /// An unfinished session that was active within the idle timeout makes
    /// this fail with [`ServerError::SessionBusy`]. An older one is treated
    /// as abandoned and replaced. If `f` fails, no session is installed.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::SessionBusy`], a collection error, or whatever
    /// `f` returns.
    pub fn begin<T>(
        &self,
        user: &str,
        f: impl FnOnce(&mut SyncSession, &mut dyn CollectionStore) -> ServerResult<T>,
    ) -> ServerResult<T> {
        let slot = self.slot(user)?;
        let mut slot = slot.lock();

        if slot.is_busy(self.idle_timeout) {
            warn!("rejecting start for {}: sync already in progress", user);
            return Err(ServerError::SessionBusy(user.to_string()));
        }
        if let Some(old) = slot.session.take() {
            if old.state().is_active() {
                warn!(
                    "releasing abandoned session for {} in state {}",
                    user,
                    old.state()
                );
            }
        }

        let mut session = SyncSession::new(self.policy);
        let out = f(&mut session, slot.store.as_mut())?;
        slot.session = Some(session);
        slot.last_activity = Instant::now();
        Ok(out)
    }

    /// Runs `f` on the user's current session.
    ///
    /// A server-side failure releases the session so the client can retry
    /// from `start` straight away.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidSessionState`] if there is no session,
    /// or whatever `f` returns.
    pub fn with_session<T>(
        &self,
        user: &str,
        operation: &'static str,
        f: impl FnOnce(&mut SyncSession, &mut dyn CollectionStore) -> ServerResult<T>,
    ) -> ServerResult<T> {
        let slot = self.slot(user)?;
        let mut guard = slot.lock();
        let UserSlot {
            store,
            session,
            last_activity,
        } = &mut *guard;

        let Some(current) = session.as_mut() else {
            return Err(ServerError::InvalidSessionState {
                state: SessionState::Created,
                operation,
            });
        };

        let result = f(current, store.as_mut());
        *last_activity = Instant::now();
        if let Err(e) = &result {
            if e.is_server_error() {
                warn!("releasing session for {} after {}: {}", user, operation, e);
                *session = None;
            }
        }
        result
    }

    /// Returns the state of the user's session, if there is one.
    pub fn session_state(&self, user: &str) -> Option<SessionState> {
        let slot = self.slots.read().get(user).cloned()?;
        let state = slot.lock().session.as_ref().map(SyncSession::state);
        state
    }

    /// Number of users with an unfinished session.
    pub fn active_sessions(&self) -> usize {
        let slots: Vec<_> = self.slots.read().values().cloned().collect();
        slots
            .iter()
            .filter(|slot| {
                slot.lock()
                    .session
                    .as_ref()
                    .is_some_and(|s| s.state().is_active())
            })
            .count()
    }
}
