//! # ankisync Collection
//!
//! The collection store seam for the sync server.
//!
//! The sync session never touches storage directly. It talks to a
//! [`CollectionStore`], which owns cards, notes, decks, deck configs, note
//! types, tags, review logs and the grave log, and hands out usn-filtered
//! views of them.
//!
//! ## Available Stores
//!
//! - [`InMemoryCollection`] - For testing and ephemeral servers
//! - [`FileCollection`] - Persists a JSON snapshot on every committed sync
//!
//! ## Example
//!
//! ```rust
//! use ankisync_collection::{CollectionStore, InMemoryCollection, RecordKind};
//! use ankisync_protocol::{Graves, Record};
//!
//! let mut col = InMemoryCollection::new();
//! col.put(RecordKind::Card, Record::new(1, 100, 0));
//!
//! let mut graves = Graves::new();
//! graves.cards.push(1);
//! assert_eq!(col.remove(&graves, 0).unwrap(), 1);
//! assert_eq!(col.graves_since(0).unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod merge;
mod provider;
mod store;

pub use error::{CollectionError, CollectionResult};
pub use file::FileCollection;
pub use memory::{CollectionData, InMemoryCollection, RecordKind};
pub use merge::{MergePolicy, MergeStats};
pub use provider::{validate_user_name, CollectionProvider, FileProvider, MemoryProvider};
pub use store::CollectionStore;
