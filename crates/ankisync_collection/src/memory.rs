//! In-memory collection store.

use crate::error::CollectionResult;
use crate::merge::{MergePolicy, MergeStats};
use crate::store::CollectionStore;
use ankisync_protocol::{
    now_millis, now_secs, ChangeSet, DeckProjection, Grave, GraveKind, Graves, ObjectId, Record,
    RevlogEntry, SanitySummary, Usn,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Scheduler generation given to new collections.
const DEFAULT_SCHEDULER_VERSION: u8 = 2;

/// Kinds of usn-stamped records held by a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Cards.
    Card,
    /// Notes.
    Note,
    /// Decks.
    Deck,
    /// Deck configuration presets.
    DeckConfig,
    /// Note types.
    Model,
}

impl From<GraveKind> for RecordKind {
    fn from(kind: GraveKind) -> Self {
        match kind {
            GraveKind::Card => RecordKind::Card,
            GraveKind::Note => RecordKind::Note,
            GraveKind::Deck => RecordKind::Deck,
        }
    }
}

/// The full state of one collection.
///
/// This is also the on-disk snapshot format of [`crate::FileCollection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionData {
    /// Next usn to stamp.
    pub usn: Usn,
    /// Modification time in milliseconds.
    #[serde(rename = "mod")]
    pub modified: i64,
    /// Schema modification time.
    pub scm: i64,
    /// Last sync time in milliseconds.
    pub ls: i64,
    /// Creation time in seconds.
    pub crt: i64,
    /// Scheduler generation.
    pub sched_ver: u8,
    /// Collection config.
    #[serde(default)]
    pub conf: Map<String, Value>,
    /// Note types.
    #[serde(default)]
    pub models: BTreeMap<ObjectId, Record>,
    /// Decks.
    #[serde(default)]
    pub decks: BTreeMap<ObjectId, Record>,
    /// Deck configuration presets.
    #[serde(default)]
    pub deck_configs: BTreeMap<ObjectId, Record>,
    /// Cards.
    #[serde(default)]
    pub cards: BTreeMap<ObjectId, Record>,
    /// Notes.
    #[serde(default)]
    pub notes: BTreeMap<ObjectId, Record>,
    /// Tag name to usn.
    #[serde(default)]
    pub tags: BTreeMap<String, Usn>,
    /// Review log.
    #[serde(default)]
    pub revlog: BTreeMap<ObjectId, RevlogEntry>,
    /// Grave log, in append order.
    #[serde(default)]
    pub graves: Vec<Grave>,
    /// Media subsystem's last usn.
    #[serde(default)]
    pub media_usn: Usn,
}

impl Default for CollectionData {
    fn default() -> Self {
        let now = now_millis();
        Self {
            usn: 0,
            modified: now,
            scm: now,
            ls: 0,
            crt: now_secs(),
            sched_ver: DEFAULT_SCHEDULER_VERSION,
            conf: Map::new(),
            models: BTreeMap::new(),
            decks: BTreeMap::new(),
            deck_configs: BTreeMap::new(),
            cards: BTreeMap::new(),
            notes: BTreeMap::new(),
            tags: BTreeMap::new(),
            revlog: BTreeMap::new(),
            graves: Vec::new(),
            media_usn: 0,
        }
    }
}

impl CollectionData {
    fn table(&self, kind: RecordKind) -> &BTreeMap<ObjectId, Record> {
        match kind {
            RecordKind::Card => &self.cards,
            RecordKind::Note => &self.notes,
            RecordKind::Deck => &self.decks,
            RecordKind::DeckConfig => &self.deck_configs,
            RecordKind::Model => &self.models,
        }
    }

    fn table_mut(&mut self, kind: RecordKind) -> &mut BTreeMap<ObjectId, Record> {
        match kind {
            RecordKind::Card => &mut self.cards,
            RecordKind::Note => &mut self.notes,
            RecordKind::Deck => &mut self.decks,
            RecordKind::DeckConfig => &mut self.deck_configs,
            RecordKind::Model => &mut self.models,
        }
    }
}

/// A collection held entirely in memory.
///
/// This store is suitable for:
/// - Unit and integration tests
/// - Ephemeral servers that do not need persistence
///
/// Besides the [`CollectionStore`] interface it offers a small local
/// mutation API (`put`, `delete`, `add_tag`, `add_revlog`) that stamps
/// changes with the current usn, the way ordinary server-side edits are.
///
/// # Example
///
/// ```rust
/// use ankisync_collection::{CollectionStore, InMemoryCollection, RecordKind};
/// use ankisync_protocol::Record;
///
/// let mut col = InMemoryCollection::new();
/// col.put(RecordKind::Model, Record::new(1, 100, 0));
/// assert_eq!(col.models().unwrap().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryCollection {
    data: CollectionData,
    media_open: bool,
}

impl InMemoryCollection {
    /// Creates a new empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collection from existing state.
    #[must_use]
    pub fn with_data(data: CollectionData) -> Self {
        Self {
            data,
            media_open: false,
        }
    }

    /// Sets the scheduler generation.
    #[must_use]
    pub fn with_scheduler_version(mut self, version: u8) -> Self {
        self.data.sched_ver = version;
        self
    }

    /// Sets the usn counter.
    #[must_use]
    pub fn with_usn(mut self, usn: Usn) -> Self {
        self.data.usn = usn;
        self
    }

    /// Returns the collection state.
    pub fn data(&self) -> &CollectionData {
        &self.data
    }

    /// Returns true once the media index has been opened.
    pub fn is_media_open(&self) -> bool {
        self.media_open
    }

    /// Sets the media subsystem's last usn.
    pub fn set_media_usn(&mut self, usn: Usn) {
        self.data.media_usn = usn;
    }

    /// Looks up a record.
    pub fn get(&self, kind: RecordKind, id: ObjectId) -> Option<&Record> {
        self.data.table(kind).get(&id)
    }

    /// Inserts or replaces a record, stamping it with the current usn.
    pub fn put(&mut self, kind: RecordKind, mut record: Record) {
        record.usn = self.data.usn;
        self.data.table_mut(kind).insert(record.id, record);
    }

    /// Deletes a card, note or deck, logging a grave at the current usn.
    ///
    /// Returns true if the object existed.
    pub fn delete(&mut self, kind: GraveKind, id: ObjectId) -> bool {
        let usn = self.data.usn;
        self.remove_one(kind, id, usn)
    }

    /// Registers a tag at the current usn if it is not known yet.
    pub fn add_tag(&mut self, name: impl Into<String>) {
        let usn = self.data.usn;
        self.data.tags.entry(name.into()).or_insert(usn);
    }

    /// Appends a review log entry at the current usn.
    pub fn add_revlog(&mut self, mut entry: RevlogEntry) {
        entry.usn = self.data.usn;
        self.data.revlog.insert(entry.id, entry);
    }

    /// Replaces the collection config.
    pub fn set_config(&mut self, conf: Map<String, Value>) {
        self.data.conf = conf;
    }

    fn remove_one(&mut self, kind: GraveKind, id: ObjectId, usn: Usn) -> bool {
        let existed = self
            .data
            .table_mut(RecordKind::from(kind))
            .remove(&id)
            .is_some();
        if existed {
            self.data.graves.push(Grave::new(id, kind, usn));
        }
        existed
    }

    fn merge_records(
        table: &mut BTreeMap<ObjectId, Record>,
        incoming: &[Record],
        usn: Usn,
        policy: MergePolicy,
        stats: &mut MergeStats,
    ) {
        for remote in incoming {
            let local = table.get(&remote.id);
            if !policy.should_replace(local, remote) {
                stats.skipped += 1;
                continue;
            }
            if local.is_some() {
                stats.replaced += 1;
            } else {
                stats.inserted += 1;
            }
            let mut record = remote.clone();
            record.usn = usn;
            table.insert(record.id, record);
        }
    }

    fn since(table: &BTreeMap<ObjectId, Record>, min_usn: Usn) -> Vec<Record> {
        table
            .values()
            .filter(|r| r.usn >= min_usn)
            .cloned()
            .collect()
    }
}

impl CollectionStore for InMemoryCollection {
    fn usn(&self) -> Usn {
        self.data.usn
    }

    fn schema_modified(&self) -> i64 {
        self.data.scm
    }

    fn modified(&self) -> i64 {
        self.data.modified
    }

    fn last_sync(&self) -> i64 {
        self.data.ls
    }

    fn scheduler_version(&self) -> u8 {
        self.data.sched_ver
    }

    fn media_last_usn(&mut self) -> CollectionResult<Usn> {
        if !self.media_open {
            debug!("opening media index");
            self.media_open = true;
        }
        Ok(self.data.media_usn)
    }

    fn graves_since(&self, min_usn: Usn) -> CollectionResult<Vec<Grave>> {
        Ok(self
            .data
            .graves
            .iter()
            .filter(|g| g.usn >= min_usn)
            .copied()
            .collect())
    }

    fn remove(&mut self, graves: &Graves, usn: Usn) -> CollectionResult<usize> {
        let mut removed = 0;
        for (kind, id) in graves.iter() {
            if self.remove_one(kind, id, usn) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn changes_since(&self, min_usn: Usn, include_config: bool) -> CollectionResult<ChangeSet> {
        let data = &self.data;
        let mut changes = ChangeSet {
            models: Self::since(&data.models, min_usn),
            decks: DeckProjection(
                Self::since(&data.decks, min_usn),
                Self::since(&data.deck_configs, min_usn),
            ),
            tags: data
                .tags
                .iter()
                .filter(|(_, usn)| **usn >= min_usn)
                .map(|(name, _)| name.clone())
                .collect(),
            cards: Self::since(&data.cards, min_usn),
            notes: Self::since(&data.notes, min_usn),
            revlog: data
                .revlog
                .values()
                .filter(|e| e.usn >= min_usn)
                .cloned()
                .collect(),
            conf: None,
            crt: None,
        };
        if include_config {
            changes.conf = Some(data.conf.clone());
            changes.crt = Some(data.crt);
        }
        Ok(changes)
    }

    fn merge(
        &mut self,
        changes: &ChangeSet,
        usn: Usn,
        policy: MergePolicy,
        accept_config: bool,
    ) -> CollectionResult<MergeStats> {
        let mut stats = MergeStats::default();
        let data = &mut self.data;

        Self::merge_records(&mut data.models, &changes.models, usn, policy, &mut stats);
        Self::merge_records(&mut data.decks, changes.decks.decks(), usn, policy, &mut stats);
        Self::merge_records(
            &mut data.deck_configs,
            changes.decks.configs(),
            usn,
            policy,
            &mut stats,
        );
        Self::merge_records(&mut data.notes, &changes.notes, usn, policy, &mut stats);
        Self::merge_records(&mut data.cards, &changes.cards, usn, policy, &mut stats);

        for name in &changes.tags {
            if !data.tags.contains_key(name) {
                data.tags.insert(name.clone(), usn);
                stats.tags_added += 1;
            }
        }

        for entry in &changes.revlog {
            if !data.revlog.contains_key(&entry.id) {
                let mut entry = entry.clone();
                entry.usn = usn;
                data.revlog.insert(entry.id, entry);
                stats.revlog_added += 1;
            }
        }

        if accept_config {
            if let Some(conf) = &changes.conf {
                data.conf = conf.clone();
                stats.config_applied = true;
            }
            if let Some(crt) = changes.crt {
                data.crt = crt;
                stats.config_applied = true;
            }
        }

        Ok(stats)
    }

    fn models(&self) -> CollectionResult<Vec<Record>> {
        Ok(self.data.models.values().cloned().collect())
    }

    fn decks(&self) -> CollectionResult<Vec<Record>> {
        Ok(self.data.decks.values().cloned().collect())
    }

    fn deck_configs(&self) -> CollectionResult<Vec<Record>> {
        Ok(self.data.deck_configs.values().cloned().collect())
    }

    fn tags(&self) -> CollectionResult<Vec<(String, Usn)>> {
        Ok(self
            .data
            .tags
            .iter()
            .map(|(name, usn)| (name.clone(), *usn))
            .collect())
    }

    fn sanity_summary(&self) -> CollectionResult<SanitySummary> {
        let data = &self.data;
        Ok(SanitySummary {
            cards: data.cards.len() as u64,
            notes: data.notes.len() as u64,
            revlog: data.revlog.len() as u64,
            graves: data.graves.len() as u64,
            models: data.models.len() as u64,
            decks: data.decks.len() as u64,
            deck_configs: data.deck_configs.len() as u64,
        })
    }

    fn commit_sync(&mut self, modified: i64, next_usn: Usn) -> CollectionResult<()> {
        self.data.modified = modified;
        self.data.ls = modified;
        self.data.usn = next_usn;
        Ok(())
    }
}
