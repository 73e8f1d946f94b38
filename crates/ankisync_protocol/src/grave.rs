//! Deletion records.

use crate::types::{ObjectId, Usn};
use serde::{Deserialize, Serialize};

/// Kind of object a grave refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraveKind {
    /// A card was deleted.
    Card,
    /// A note was deleted.
    Note,
    /// A deck was deleted.
    Deck,
}

/// A single entry of the append-only grave log.
///
/// Graves are never mutated once written. The sync session reads them;
/// pruning is the store's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grave {
    /// Id of the deleted object.
    pub oid: ObjectId,
    /// What kind of object it was.
    pub kind: GraveKind,
    /// Usn at which the deletion was recorded.
    pub usn: Usn,
}

impl Grave {
    /// Creates a new grave.
    pub fn new(oid: ObjectId, kind: GraveKind, usn: Usn) -> Self {
        Self { oid, kind, usn }
    }
}

/// Deleted object ids partitioned by kind, as exchanged on the wire.
///
/// ```json
/// {"cards": [1, 2], "notes": [3], "decks": []}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graves {
    /// Deleted card ids.
    #[serde(default)]
    pub cards: Vec<ObjectId>,
    /// Deleted note ids.
    #[serde(default)]
    pub notes: Vec<ObjectId>,
    /// Deleted deck ids.
    #[serde(default)]
    pub decks: Vec<ObjectId>,
}

impl Graves {
    /// Creates an empty grave set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object id under its kind.
    pub fn push(&mut self, kind: GraveKind, oid: ObjectId) {
        match kind {
            GraveKind::Card => self.cards.push(oid),
            GraveKind::Note => self.notes.push(oid),
            GraveKind::Deck => self.decks.push(oid),
        }
    }

    /// Iterates over every `(kind, id)` pair: notes, then cards, then decks.
    pub fn iter(&self) -> impl Iterator<Item = (GraveKind, ObjectId)> + '_ {
        self.notes
            .iter()
            .map(|id| (GraveKind::Note, *id))
            .chain(self.cards.iter().map(|id| (GraveKind::Card, *id)))
            .chain(self.decks.iter().map(|id| (GraveKind::Deck, *id)))
    }

    /// Total number of ids in the set.
    pub fn len(&self) -> usize {
        self.cards.len() + self.notes.len() + self.decks.len()
    }

    /// Returns true if the set holds no ids.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<Grave> for Graves {
    fn from_iter<I: IntoIterator<Item = Grave>>(iter: I) -> Self {
        let mut graves = Graves::new();
        for grave in iter {
            graves.push(grave.kind, grave.oid);
        }
        graves
    }
}
