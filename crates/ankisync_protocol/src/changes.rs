//! Change sets exchanged during `applyChanges`.

use crate::types::{ObjectId, Usn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A usn-stamped collection object: card, note, deck, deck config or note type.
///
/// Only the fields the sync protocol reasons about are typed. Everything
/// else the client sends is preserved verbatim in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable object id.
    pub id: ObjectId,
    /// Modification time, used for last-write-wins merging.
    #[serde(rename = "mod")]
    pub mtime: i64,
    /// Update sequence number.
    pub usn: Usn,
    /// Remaining fields, opaque to the sync layer.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates a record with no extra fields.
    pub fn new(id: ObjectId, mtime: i64, usn: Usn) -> Self {
        Self {
            id,
            mtime,
            usn,
            fields: Map::new(),
        }
    }

    /// Adds an opaque field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// A review log entry. Review logs are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevlogEntry {
    /// Entry id (review timestamp in milliseconds).
    pub id: ObjectId,
    /// Reviewed card.
    pub cid: ObjectId,
    /// Update sequence number.
    pub usn: Usn,
    /// Remaining fields, opaque to the sync layer.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RevlogEntry {
    /// Creates a review log entry with no extra fields.
    pub fn new(id: ObjectId, cid: ObjectId, usn: Usn) -> Self {
        Self {
            id,
            cid,
            usn,
            fields: Map::new(),
        }
    }
}

/// Deck definitions and deck configuration presets, as two parallel lists.
///
/// Serialized as `[[decks...], [configs...]]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeckProjection(pub Vec<Record>, pub Vec<Record>);

impl DeckProjection {
    /// Deck definitions.
    pub fn decks(&self) -> &[Record] {
        &self.0
    }

    /// Deck configuration presets.
    pub fn configs(&self) -> &[Record] {
        &self.1
    }
}

/// Every entity whose usn falls inside a sync window.
///
/// A change set is a view, not a stored entity: it is recomputed for each
/// request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Note types.
    #[serde(default)]
    pub models: Vec<Record>,
    /// Decks and deck configs.
    #[serde(default)]
    pub decks: DeckProjection,
    /// Tag names.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Cards.
    #[serde(default)]
    pub cards: Vec<Record>,
    /// Notes.
    #[serde(default)]
    pub notes: Vec<Record>,
    /// Review log entries.
    #[serde(default)]
    pub revlog: Vec<RevlogEntry>,
    /// Collection config, sent only by the newer side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf: Option<Map<String, Value>>,
    /// Collection creation time, sent only by the newer side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crt: Option<i64>,
}

impl ChangeSet {
    /// Number of entities carried, not counting config.
    pub fn len(&self) -> usize {
        self.models.len()
            + self.decks.0.len()
            + self.decks.1.len()
            + self.tags.len()
            + self.cards.len()
            + self.notes.len()
            + self.revlog.len()
    }

    /// Returns true if no entity and no config is carried.
    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.conf.is_none() && self.crt.is_none()
    }
}
