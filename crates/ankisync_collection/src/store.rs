//! Collection store trait definition.

use crate::error::CollectionResult;
use crate::merge::{MergePolicy, MergeStats};
use ankisync_protocol::{ChangeSet, Grave, Graves, Record, SanitySummary, Usn};

/// The authoritative holder of one user's collection.
///
/// The sync session reads and mutates a collection exclusively through
/// this trait. Implementations decide how data is laid out and persisted.
///
/// # Invariants
///
/// - `usn` is the number the next server-side change will be stamped with;
///   it only moves forward, and only through `commit_sync`
/// - `graves_since` returns every grave with `usn >= min_usn`, with no
///   upper bound
/// - `remove` and `merge` are idempotent: applying the same input twice
///   leaves the collection as applying it once
/// - Stores must be `Send` so a server can hand them between threads
///
/// # Implementors
///
/// - [`super::InMemoryCollection`] - For testing
/// - [`super::FileCollection`] - For persistent storage
pub trait CollectionStore: Send {
    /// Returns the usn the next change will be stamped with.
    fn usn(&self) -> Usn;

    /// Returns the schema modification time.
    fn schema_modified(&self) -> i64;

    /// Returns the collection modification time in milliseconds.
    fn modified(&self) -> i64;

    /// Returns the time of the last committed sync in milliseconds.
    fn last_sync(&self) -> i64;

    /// Returns the scheduler generation of the collection.
    fn scheduler_version(&self) -> u8;

    /// Returns the media subsystem's last usn.
    ///
    /// Opens the media index first if it is not open yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the media index cannot be opened.
    fn media_last_usn(&mut self) -> CollectionResult<Usn>;

    /// Returns every grave stamped at or above `min_usn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the grave log cannot be read.
    fn graves_since(&self, min_usn: Usn) -> CollectionResult<Vec<Grave>>;

    /// Deletes the listed objects.
    ///
    /// Each object that actually existed is removed and a grave stamped
    /// with `usn` is appended to the log. Ids that are already gone are
    /// skipped.
    ///
    /// Returns the number of objects removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be mutated.
    fn remove(&mut self, graves: &Graves, usn: Usn) -> CollectionResult<usize>;

    /// Returns every entity stamped at or above `min_usn`.
    ///
    /// When `include_config` is set the collection config and creation
    /// time are attached as well.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be read.
    fn changes_since(&self, min_usn: Usn, include_config: bool) -> CollectionResult<ChangeSet>;

    /// Merges a remote change set into the collection.
    ///
    /// Entities that win under `policy` are stored stamped with `usn`.
    /// When `accept_config` is set, a config or creation time carried by
    /// `changes` replaces the local one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be mutated.
    fn merge(
        &mut self,
        changes: &ChangeSet,
        usn: Usn,
        policy: MergePolicy,
        accept_config: bool,
    ) -> CollectionResult<MergeStats>;

    /// Returns all note types.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be read.
    fn models(&self) -> CollectionResult<Vec<Record>>;

    /// Returns all decks.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be read.
    fn decks(&self) -> CollectionResult<Vec<Record>>;

    /// Returns all deck configuration presets.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be read.
    fn deck_configs(&self) -> CollectionResult<Vec<Record>>;

    /// Returns all tags with their usn.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be read.
    fn tags(&self) -> CollectionResult<Vec<(String, Usn)>>;

    /// Computes the structural summary compared by `sanityCheck2`.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be read.
    fn sanity_summary(&self) -> CollectionResult<SanitySummary>;

    /// Records a completed sync.
    ///
    /// Sets the modification and last-sync times to `modified`, moves the
    /// usn counter to `next_usn`, and makes the result durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be persisted.
    fn commit_sync(&mut self, modified: i64, next_usn: Usn) -> CollectionResult<()>;
}
