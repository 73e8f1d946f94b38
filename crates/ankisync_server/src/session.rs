//! The sync session state machine.
//!
//! One [`SyncSession`] drives one reconciliation pass:
//!
//! ```text
//! created -> started -> graves-applied -> changes-applied -> verified -> finished
//! ```
//!
//! `applyGraves` may be skipped (older clients send their graves with
//! `start`) or repeated (graves arrive in chunks). Every other transition
//! happens exactly once. A finished session accepts nothing; the client
//! must start a fresh one.
//!
//! The session never owns the collection. Each step borrows the store, so
//! the caller decides how access to it is serialised.

use crate::error::{ServerError, ServerResult};
use ankisync_collection::{CollectionStore, MergePolicy};
use ankisync_protocol::{
    now_millis, ChangeSet, DeckProjection, Graves, Record, SanityCheckResponse, SanitySummary,
    Usn,
};
use std::fmt;
use tracing::{debug, info, warn};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, `start` not called yet.
    Created,
    /// Watermarks taken.
    Started,
    /// At least one `applyGraves` chunk applied.
    GravesApplied,
    /// Change sets exchanged and merged.
    ChangesApplied,
    /// Sanity check done.
    Verified,
    /// Terminal.
    Finished,
}

impl SessionState {
    /// Returns the state's wire-style name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Started => "started",
            SessionState::GravesApplied => "graves-applied",
            SessionState::ChangesApplied => "changes-applied",
            SessionState::Verified => "verified",
            SessionState::Finished => "finished",
        }
    }

    /// Returns true once `start` succeeded and before `finish`.
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Created | SessionState::Finished)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States from which the read-only projections may be served.
const READABLE: &[SessionState] = &[
    SessionState::Started,
    SessionState::GravesApplied,
    SessionState::ChangesApplied,
    SessionState::Verified,
];

/// One reconciliation pass for one client.
#[derive(Debug, Clone)]
pub struct SyncSession {
    state: SessionState,
    min_usn: Usn,
    max_usn: Usn,
    local_newer: bool,
    remote_changes: Option<ChangeSet>,
    policy: MergePolicy,
}

impl SyncSession {
    /// Creates a session that merges with `policy`.
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            state: SessionState::Created,
            min_usn: 0,
            max_usn: 0,
            local_newer: false,
            remote_changes: None,
            policy,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the client's watermark.
    pub fn min_usn(&self) -> Usn {
        self.min_usn
    }

    /// Returns the usn counter snapshot taken at `start`.
    pub fn max_usn(&self) -> Usn {
        self.max_usn
    }

    /// Returns true if the server replica is the newer side.
    pub fn local_newer(&self) -> bool {
        self.local_newer
    }

    /// Returns the change set the client sent, once `applyChanges` ran.
    pub fn remote_changes(&self) -> Option<&ChangeSet> {
        self.remote_changes.as_ref()
    }

    fn expect_state(&self, operation: &'static str, allowed: &[SessionState]) -> ServerResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ServerError::InvalidSessionState {
                state: self.state,
                operation,
            })
        }
    }

    /// Opens the sync window.
    ///
    /// Snapshots `maxUsn`, records `minUsn`, and returns the server's graves
    /// at or above `minUsn`. The client's graves, if any, are applied only
    /// after the server's have been read.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidSessionState`] unless the session is
    /// fresh, or a store error.
    pub fn start(
        &mut self,
        store: &mut dyn CollectionStore,
        min_usn: Usn,
        client_newer: bool,
        client_graves: Option<&Graves>,
    ) -> ServerResult<Graves> {
        self.expect_state("start", &[SessionState::Created])?;

        self.max_usn = store.usn();
        self.min_usn = min_usn;
        self.local_newer = !client_newer;

        let server_graves = self.removed(store)?;
        if let Some(graves) = client_graves {
            self.remove(store, graves)?;
        }

        self.state = SessionState::Started;
        info!(
            "sync started: minUsn={} maxUsn={} lnewer={} graves out={}",
            self.min_usn,
            self.max_usn,
            self.local_newer,
            server_graves.len()
        );
        Ok(server_graves)
    }

    /// Applies one chunk of client deletions.
    ///
    /// Ids that are already gone are skipped, so a chunk may be resent.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidSessionState`] outside
    /// `started`/`graves-applied`, or a store error.
    pub fn apply_graves(
        &mut self,
        store: &mut dyn CollectionStore,
        chunk: &Graves,
    ) -> ServerResult<()> {
        self.expect_state(
            "applyGraves",
            &[SessionState::Started, SessionState::GravesApplied],
        )?;
        self.remove(store, chunk)?;
        self.state = SessionState::GravesApplied;
        Ok(())
    }

    /// Exchanges change sets.
    ///
    /// The server's changes are computed before the client's are merged,
    /// and merged records are stamped `maxUsn`, so nothing the client just
    /// sent is echoed back. The collection config travels with whichever
    /// side is newer.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidSessionState`] outside
    /// `started`/`graves-applied`, or a store error.
    pub fn apply_changes(
        &mut self,
        store: &mut dyn CollectionStore,
        remote: ChangeSet,
    ) -> ServerResult<ChangeSet> {
        self.expect_state(
            "applyChanges",
            &[SessionState::Started, SessionState::GravesApplied],
        )?;

        let local = store.changes_since(self.min_usn, self.local_newer)?;
        let stats = store.merge(&remote, self.max_usn, self.policy, !self.local_newer)?;
        debug!(
            "merged {} remote entities ({} inserted, {} replaced, {} skipped), sending {}",
            remote.len(),
            stats.inserted,
            stats.replaced,
            stats.skipped,
            local.len()
        );

        self.remote_changes = Some(remote);
        self.state = SessionState::ChangesApplied;
        Ok(local)
    }

    /// Compares the client's summary with the server's.
    ///
    /// A mismatch is reported, not raised.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidSessionState`] unless changes have been
    /// applied, or a store error.
    pub fn sanity_check(
        &mut self,
        store: &dyn CollectionStore,
        client: SanitySummary,
    ) -> ServerResult<SanityCheckResponse> {
        self.expect_state("sanityCheck2", &[SessionState::ChangesApplied])?;

        let server = store.sanity_summary()?;
        self.state = SessionState::Verified;
        if client == server {
            Ok(SanityCheckResponse::Ok)
        } else {
            warn!("sanity check failed: client {:?} server {:?}", client, server);
            Ok(SanityCheckResponse::Bad { client, server })
        }
    }

    /// Commits the sync and ends the session.
    ///
    /// The new modification time is `max(now, previous + 1)` in
    /// milliseconds, and the usn counter moves to `maxUsn + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidSessionState`] unless the sanity check
    /// ran, or a store error.
    pub fn finish(&mut self, store: &mut dyn CollectionStore) -> ServerResult<i64> {
        self.expect_state("finish", &[SessionState::Verified])?;

        let modified = now_millis().max(store.modified().saturating_add(1));
        let next_usn = self.max_usn.saturating_add(1);
        store.commit_sync(modified, next_usn)?;

        self.state = SessionState::Finished;
        self.remote_changes = None;
        info!("sync finished: mod={} usn={}", modified, next_usn);
        Ok(modified)
    }

    /// Returns note types at or above `minUsn`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidSessionState`] outside an active
    /// session, or a store error.
    pub fn models(&self, store: &dyn CollectionStore) -> ServerResult<Vec<Record>> {
        self.expect_state("getModels", READABLE)?;
        Ok(self.since(store.models()?))
    }

    /// Returns decks and deck configs at or above `minUsn`, each filtered
    /// on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidSessionState`] outside an active
    /// session, or a store error.
    pub fn decks(&self, store: &dyn CollectionStore) -> ServerResult<DeckProjection> {
        self.expect_state("getDecks", READABLE)?;
        Ok(DeckProjection(
            self.since(store.decks()?),
            self.since(store.deck_configs()?),
        ))
    }

    /// Returns tag names at or above `minUsn`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidSessionState`] outside an active
    /// session, or a store error.
    pub fn tags(&self, store: &dyn CollectionStore) -> ServerResult<Vec<String>> {
        self.expect_state("getTags", READABLE)?;
        Ok(store
            .tags()?
            .into_iter()
            .filter(|(_, usn)| *usn >= self.min_usn)
            .map(|(name, _)| name)
            .collect())
    }

    /// Returns the server's graves at or above `minUsn`, partitioned by kind.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn removed(&self, store: &dyn CollectionStore) -> ServerResult<Graves> {
        Ok(store.graves_since(self.min_usn)?.into_iter().collect())
    }

    fn remove(&self, store: &mut dyn CollectionStore, graves: &Graves) -> ServerResult<()> {
        if graves.is_empty() {
            return Ok(());
        }
        let removed = store.remove(graves, self.max_usn)?;
        debug!("applied {} graves, {} objects removed", graves.len(), removed);
        Ok(())
    }

    fn since(&self, records: Vec<Record>) -> Vec<Record> {
        records
            .into_iter()
            .filter(|r| r.usn >= self.min_usn)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ankisync_collection::{CollectionData, InMemoryCollection, RecordKind};
    use ankisync_protocol::{Grave, GraveKind, RevlogEntry};
    use proptest::prelude::*;
    use serde_json::{json, Map};

    fn started(col: &mut InMemoryCollection, min_usn: Usn, client_newer: bool) -> SyncSession {
        let mut session = SyncSession::new(MergePolicy::LastWriteWins);
        session.start(col, min_usn, client_newer, None).unwrap();
        session
    }

    #[test]
    fn full_pass() {
        let mut col = InMemoryCollection::new().with_usn(5);
        col.put(RecordKind::Note, Record::new(1, 100, 0));
        let mut session = started(&mut col, 0, true);
        assert_eq!(session.state(), SessionState::Started);
        assert_eq!(session.max_usn(), 5);

        let mut chunk = Graves::new();
        chunk.push(GraveKind::Note, 1);
        session.apply_graves(&mut col, &chunk).unwrap();
        assert_eq!(session.state(), SessionState::GravesApplied);

        let remote = ChangeSet {
            notes: vec![Record::new(2, 200, -1)],
            ..ChangeSet::default()
        };
        session.apply_changes(&mut col, remote).unwrap();
        assert_eq!(session.state(), SessionState::ChangesApplied);

        let summary = col.sanity_summary().unwrap();
        assert!(session.sanity_check(&col, summary).unwrap().is_ok());

        let before = col.modified();
        let modified = session.finish(&mut col).unwrap();
        assert!(modified > before);
        assert_eq!(col.modified(), modified);
        assert_eq!(col.last_sync(), modified);
        assert_eq!(col.usn(), 6);
        assert_eq!(session.state(), SessionState::Finished);
    }

    #[test]
    fn start_returns_graves_before_applying_clients() {
        let mut col = InMemoryCollection::new().with_usn(3);
        col.put(RecordKind::Card, Record::new(10, 1, 0));
        col.put(RecordKind::Card, Record::new(11, 1, 0));
        col.delete(GraveKind::Card, 10);

        let mut client = Graves::new();
        client.push(GraveKind::Card, 11);

        let mut session = SyncSession::new(MergePolicy::default());
        let graves = session.start(&mut col, 0, true, Some(&client)).unwrap();

        assert_eq!(graves.cards, vec![10]);
        assert!(col.get(RecordKind::Card, 11).is_none());
        let logged = col.graves_since(0).unwrap();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[1], Grave::new(11, GraveKind::Card, 3));
    }

    #[test]
    fn graves_for_missing_objects_are_not_logged() {
        let mut col = InMemoryCollection::new();
        let mut session = started(&mut col, 0, true);

        let mut chunk = Graves::new();
        chunk.push(GraveKind::Deck, 99);
        session.apply_graves(&mut col, &chunk).unwrap();
        session.apply_graves(&mut col, &chunk).unwrap();

        assert!(col.graves_since(0).unwrap().is_empty());
    }

    #[test]
    fn changes_are_not_echoed() {
        let mut col = InMemoryCollection::new().with_usn(4);
        col.put(RecordKind::Model, Record::new(1, 10, 0));
        let mut session = started(&mut col, 4, true);

        let remote = ChangeSet {
            models: vec![Record::new(2, 20, -1)],
            tags: vec!["remote".into()],
            ..ChangeSet::default()
        };
        let local = session.apply_changes(&mut col, remote).unwrap();

        assert_eq!(local.models.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1]);
        assert!(local.tags.is_empty());
        assert_eq!(col.get(RecordKind::Model, 2).unwrap().usn, 4);
        assert_eq!(session.remote_changes().unwrap().models.len(), 1);
    }

    #[test]
    fn config_follows_newer_side() {
        let mut conf = Map::new();
        conf.insert("curDeck".into(), json!(1));

        let mut col = InMemoryCollection::new();
        col.set_config(conf.clone());
        let mut session = started(&mut col, 0, false);
        let local = session.apply_changes(&mut col, ChangeSet::default()).unwrap();
        assert_eq!(local.conf, Some(conf));
        assert!(local.crt.is_some());

        let mut remote_conf = Map::new();
        remote_conf.insert("curDeck".into(), json!(2));
        let mut col = InMemoryCollection::new();
        let mut session = started(&mut col, 0, true);
        let remote = ChangeSet {
            conf: Some(remote_conf.clone()),
            crt: Some(42),
            ..ChangeSet::default()
        };
        let local = session.apply_changes(&mut col, remote).unwrap();
        assert!(local.conf.is_none());
        assert_eq!(col.data().conf, remote_conf);
        assert_eq!(col.data().crt, 42);
    }

    #[test]
    fn sanity_mismatch_is_reported() {
        let mut col = InMemoryCollection::new();
        col.add_revlog(RevlogEntry::new(1, 1, 0));
        let mut session = started(&mut col, 0, true);
        session.apply_changes(&mut col, ChangeSet::default()).unwrap();

        let response = session.sanity_check(&col, SanitySummary::default()).unwrap();
        match response {
            SanityCheckResponse::Bad { client, server } => {
                assert_eq!(client, SanitySummary::default());
                assert_eq!(server.revlog, 1);
            }
            SanityCheckResponse::Ok => panic!("expected a mismatch"),
        }
        assert_eq!(session.state(), SessionState::Verified);
    }

    #[test]
    fn finish_is_terminal() {
        let mut col = InMemoryCollection::new();
        let mut session = started(&mut col, 0, true);
        session.apply_changes(&mut col, ChangeSet::default()).unwrap();
        let summary = col.sanity_summary().unwrap();
        session.sanity_check(&col, summary).unwrap();
        session.finish(&mut col).unwrap();

        let graves = Graves::new();
        assert!(matches!(
            session.apply_graves(&mut col, &graves),
            Err(ServerError::InvalidSessionState { .. })
        ));
        assert!(session.apply_changes(&mut col, ChangeSet::default()).is_err());
        assert!(session.sanity_check(&col, summary).is_err());
        assert!(session.finish(&mut col).is_err());
        assert!(session.models(&col).is_err());
        assert!(session.decks(&col).is_err());
        assert!(session.tags(&col).is_err());
        assert!(session.start(&mut col, 0, true, None).is_err());
    }

    #[test]
    fn steps_out_of_order_are_rejected() {
        let mut col = InMemoryCollection::new();
        let mut session = SyncSession::new(MergePolicy::default());
        assert!(session.models(&col).is_err());
        assert!(session.apply_changes(&mut col, ChangeSet::default()).is_err());

        session.start(&mut col, 0, true, None).unwrap();
        let err = session.finish(&mut col).unwrap_err();
        assert!(matches!(
            err,
            ServerError::InvalidSessionState {
                state: SessionState::Started,
                operation: "finish"
            }
        ));
        assert!(session
            .sanity_check(&col, SanitySummary::default())
            .is_err());

        session.apply_changes(&mut col, ChangeSet::default()).unwrap();
        assert!(session.apply_graves(&mut col, &Graves::new()).is_err());
    }

    #[test]
    fn finish_advances_past_previous_mod() {
        let far_future = now_millis() + 1_000_000;
        let mut col = InMemoryCollection::with_data(CollectionData {
            modified: far_future,
            ..CollectionData::default()
        });
        let mut session = started(&mut col, 0, true);
        session.apply_changes(&mut col, ChangeSet::default()).unwrap();
        let summary = col.sanity_summary().unwrap();
        session.sanity_check(&col, summary).unwrap();

        assert_eq!(session.finish(&mut col).unwrap(), far_future + 1);
    }

    #[test]
    fn projections_filter_by_watermark() {
        let mut col = InMemoryCollection::new();
        for usn in 0..4 {
            col = col.with_usn(usn);
            let id = i64::from(usn);
            col.put(RecordKind::Model, Record::new(id, 1, 0));
            col.put(RecordKind::Deck, Record::new(id, 1, 0));
            col.add_tag(format!("t{}", usn));
        }
        col = col.with_usn(0);
        col.put(RecordKind::DeckConfig, Record::new(1, 1, 0));

        let session = started(&mut col, 2, true);
        let ids = |records: &[Record]| records.iter().map(|r| r.id).collect::<Vec<_>>();

        assert_eq!(ids(&session.models(&col).unwrap()), vec![2, 3]);
        let decks = session.decks(&col).unwrap();
        assert_eq!(ids(decks.decks()), vec![2, 3]);
        assert!(decks.configs().is_empty());
        assert_eq!(session.tags(&col).unwrap(), vec!["t2", "t3"]);
    }

    proptest! {
        #[test]
        fn removed_honours_watermark(
            usns in proptest::collection::vec(0i32..20, 0..40),
            min_usn in 0i32..20,
        ) {
            let graves: Vec<Grave> = usns
                .iter()
                .enumerate()
                .map(|(i, usn)| Grave::new(i as i64, GraveKind::Card, *usn))
                .collect();
            let mut col = InMemoryCollection::with_data(CollectionData {
                usn: 20,
                graves: graves.clone(),
                ..CollectionData::default()
            });

            let mut session = SyncSession::new(MergePolicy::default());
            let out = session.start(&mut col, min_usn, true, None).unwrap();

            let expected: Vec<i64> = graves
                .iter()
                .filter(|g| g.usn >= min_usn)
                .map(|g| g.oid)
                .collect();
            prop_assert_eq!(out.cards, expected);
        }

        #[test]
        fn apply_graves_is_idempotent(
            present in proptest::collection::btree_set(0i64..30, 0..20),
            deleted in proptest::collection::vec(0i64..30, 0..20),
            repeats in 1usize..4,
        ) {
            let mut seed = InMemoryCollection::new().with_usn(1);
            for id in &present {
                seed.put(RecordKind::Note, Record::new(*id, 1, 0));
            }
            let mut chunk = Graves::new();
            for id in &deleted {
                chunk.push(GraveKind::Note, *id);
            }

            let mut once = seed.clone();
            let mut session = started(&mut once, 0, true);
            session.apply_graves(&mut once, &chunk).unwrap();

            let mut many = seed;
            let mut session = started(&mut many, 0, true);
            for _ in 0..repeats {
                session.apply_graves(&mut many, &chunk).unwrap();
            }

            prop_assert_eq!(once.data(), many.data());
        }
    }
}
