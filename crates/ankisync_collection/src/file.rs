//! File-backed collection store.

use crate::error::CollectionResult;
use crate::memory::{CollectionData, InMemoryCollection};
use crate::merge::{MergePolicy, MergeStats};
use crate::store::CollectionStore;
use ankisync_protocol::{ChangeSet, Grave, Graves, Record, SanitySummary, Usn};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A collection persisted as a JSON snapshot.
///
/// All reads and writes go to an in-memory copy. The snapshot is written
/// when a sync is committed, so an abandoned sync never leaves a
/// half-merged collection on disk.
///
/// # Durability
///
/// The snapshot is written to a sibling temporary file, synced, and then
/// renamed over the previous one.
///
/// # Example
///
/// ```no_run
/// use ankisync_collection::{CollectionStore, FileCollection};
/// use std::path::Path;
///
/// let mut col = FileCollection::open(Path::new("alice/collection.json")).unwrap();
/// col.commit_sync(1_700_000_000_000, 1).unwrap();
/// ```
#[derive(Debug)]
pub struct FileCollection {
    path: PathBuf,
    inner: InMemoryCollection,
}

impl FileCollection {
    /// Opens the collection at `path`, creating it if it does not exist.
    ///
    /// Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written, or if it
    /// does not hold a valid snapshot.
    pub fn open(path: &Path) -> CollectionResult<Self> {
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let data: CollectionData = serde_json::from_reader(reader)?;
            debug!("loaded collection from {:?}", path);
            return Ok(Self {
                path: path.to_path_buf(),
                inner: InMemoryCollection::with_data(data),
            });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let col = Self {
            path: path.to_path_buf(),
            inner: InMemoryCollection::new(),
        };
        col.persist()?;
        debug!("created collection at {:?}", path);
        Ok(col)
    }

    /// Returns the path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the in-memory state.
    pub fn inner(&self) -> &InMemoryCollection {
        &self.inner
    }

    /// Returns the in-memory state for local edits.
    ///
    /// Edits become durable with the next committed sync or [`Self::persist`].
    pub fn inner_mut(&mut self) -> &mut InMemoryCollection {
        &mut self.inner
    }

    /// Writes the current state to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn persist(&self) -> CollectionResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self.inner.data())?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CollectionStore for FileCollection {
    fn usn(&self) -> Usn {
        self.inner.usn()
    }

    fn schema_modified(&self) -> i64 {
        self.inner.schema_modified()
    }

    fn modified(&self) -> i64 {
        self.inner.modified()
    }

    fn last_sync(&self) -> i64 {
        self.inner.last_sync()
    }

    fn scheduler_version(&self) -> u8 {
        self.inner.scheduler_version()
    }

    fn media_last_usn(&mut self) -> CollectionResult<Usn> {
        self.inner.media_last_usn()
    }

    fn graves_since(&self, min_usn: Usn) -> CollectionResult<Vec<Grave>> {
        self.inner.graves_since(min_usn)
    }

    fn remove(&mut self, graves: &Graves, usn: Usn) -> CollectionResult<usize> {
        self.inner.remove(graves, usn)
    }

    fn changes_since(&self, min_usn: Usn, include_config: bool) -> CollectionResult<ChangeSet> {
        self.inner.changes_since(min_usn, include_config)
    }

    fn merge(
        &mut self,
        changes: &ChangeSet,
        usn: Usn,
        policy: MergePolicy,
        accept_config: bool,
    ) -> CollectionResult<MergeStats> {
        self.inner.merge(changes, usn, policy, accept_config)
    }

    fn models(&self) -> CollectionResult<Vec<Record>> {
        self.inner.models()
    }

    fn decks(&self) -> CollectionResult<Vec<Record>> {
        self.inner.decks()
    }

    fn deck_configs(&self) -> CollectionResult<Vec<Record>> {
        self.inner.deck_configs()
    }

    fn tags(&self) -> CollectionResult<Vec<(String, Usn)>> {
        self.inner.tags()
    }

    fn sanity_summary(&self) -> CollectionResult<SanitySummary> {
        self.inner.sanity_summary()
    }

    fn commit_sync(&mut self, modified: i64, next_usn: Usn) -> CollectionResult<()> {
        self.inner.commit_sync(modified, next_usn)?;
        self.persist()
    }
}
