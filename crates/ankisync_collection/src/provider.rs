//! Opening a user's collection.

use crate::error::{CollectionError, CollectionResult};
use crate::file::FileCollection;
use crate::memory::InMemoryCollection;
use crate::store::CollectionStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File name of a user's collection inside their directory.
const COLLECTION_FILE: &str = "collection.json";

/// Opens the collection belonging to a user.
pub trait CollectionProvider: Send + Sync {
    /// Opens (or creates) the collection for `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not acceptable or the collection
    /// cannot be opened.
    fn open(&self, user: &str) -> CollectionResult<Box<dyn CollectionStore>>;
}

/// Checks that a user name can safely name a collection.
///
/// # Errors
///
/// Returns [`CollectionError::InvalidName`] for empty names, `.` and `..`,
/// and names containing path separators or NUL.
pub fn validate_user_name(user: &str) -> CollectionResult<()> {
    let bad = user.is_empty()
        || user == "."
        || user == ".."
        || user.contains(['/', '\\', '\0']);
    if bad {
        return Err(CollectionError::InvalidName(user.to_string()));
    }
    Ok(())
}

/// Hands out in-memory collections.
///
/// Users with a seeded collection get a copy of it; everybody else gets a
/// fresh empty collection.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    seeds: RwLock<HashMap<String, InMemoryCollection>>,
}

impl MemoryProvider {
    /// Creates a provider with no seeded collections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the collection returned for `user`.
    #[must_use]
    pub fn with_collection(self, user: impl Into<String>, collection: InMemoryCollection) -> Self {
        self.seeds.write().insert(user.into(), collection);
        self
    }
}

impl CollectionProvider for MemoryProvider {
    fn open(&self, user: &str) -> CollectionResult<Box<dyn CollectionStore>> {
        validate_user_name(user)?;
        let collection = self.seeds.read().get(user).cloned().unwrap_or_default();
        Ok(Box::new(collection))
    }
}

/// Keeps each user's collection at `<root>/<user>/collection.json`.
#[derive(Debug, Clone)]
pub struct FileProvider {
    root: PathBuf,
}

impl FileProvider {
    /// Creates a provider rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the snapshot path for `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the user name is not acceptable.
    pub fn collection_path(&self, user: &str) -> CollectionResult<PathBuf> {
        validate_user_name(user)?;
        Ok(self.root.join(user).join(COLLECTION_FILE))
    }
}

impl CollectionProvider for FileProvider {
    fn open(&self, user: &str) -> CollectionResult<Box<dyn CollectionStore>> {
        let path = self.collection_path(user)?;
        Ok(Box::new(FileCollection::open(&path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RecordKind;
    use ankisync_protocol::Record;
    use tempfile::tempdir;

    #[test]
    fn user_names() {
        assert!(validate_user_name("alice").is_ok());
        assert!(validate_user_name("alice.smith@example.com").is_ok());
        assert!(validate_user_name("").is_err());
        assert!(validate_user_name("..").is_err());
        assert!(validate_user_name("../etc").is_err());
        assert!(validate_user_name("a\\b").is_err());
    }

    #[test]
    fn memory_provider_returns_seed_copies() {
        let mut seed = InMemoryCollection::new();
        seed.put(RecordKind::Model, Record::new(1, 1, 0));
        let provider = MemoryProvider::new().with_collection("alice", seed);

        assert_eq!(provider.open("alice").unwrap().models().unwrap().len(), 1);
        assert!(provider.open("bob").unwrap().models().unwrap().is_empty());
    }

    #[test]
    fn file_provider_layout() {
        let dir = tempdir().unwrap();
        let provider = FileProvider::new(dir.path());

        provider.open("alice").unwrap();
        assert!(dir.path().join("alice").join(COLLECTION_FILE).exists());
        assert!(provider.open("../escape").is_err());
    }
}
