//! Typed request and response messages, one pair per operation.
//!
//! Requests are validated when they are decoded from a [`crate::Payload`]:
//! a missing or mistyped field is rejected before any session logic runs.

use crate::grave::Graves;
use crate::types::Usn;
use crate::changes::ChangeSet;
use serde::{Deserialize, Serialize};

/// `hostKey` request: user credentials.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostKeyRequest {
    /// User name.
    #[serde(rename = "u")]
    pub username: String,
    /// Password.
    #[serde(rename = "p")]
    pub password: String,
}

/// `hostKey` response: the issued key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostKeyResponse {
    /// Key the client presents on every later request.
    pub key: String,
}

/// `meta` request: the client's protocol version and self description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetaRequest {
    /// Sync protocol version the client speaks.
    #[serde(rename = "c", alias = "v")]
    pub protocol_version: u32,
    /// `client,version,platform` string.
    #[serde(rename = "cv")]
    pub client_version: String,
}

/// `meta` response when the server accepts the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMeta {
    /// Schema modification time.
    pub scm: i64,
    /// Server time in seconds.
    pub ts: i64,
    /// Collection modification time.
    #[serde(rename = "mod")]
    pub modified: i64,
    /// Current server usn.
    pub usn: Usn,
    /// Media subsystem's last usn.
    pub musn: Usn,
    /// Advisory message, empty on acceptance.
    pub msg: String,
    /// Always true on acceptance.
    pub cont: bool,
}

/// `meta` response when the client should stop gracefully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRefusal {
    /// Always false.
    pub cont: bool,
    /// Human readable reason.
    pub msg: String,
}

impl MetaRefusal {
    /// Creates a refusal with the given message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            cont: false,
            msg: msg.into(),
        }
    }
}

/// `start` request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StartRequest {
    /// Watermark below which the client has seen everything.
    #[serde(rename = "minUsn")]
    pub min_usn: Usn,
    /// Whether the client's replica is newer than the server's.
    #[serde(rename = "lnewer")]
    pub client_newer: bool,
    /// Client deletions; newer clients send these in `applyGraves` instead.
    #[serde(default)]
    pub graves: Option<Graves>,
}

/// `applyGraves` request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApplyGravesRequest {
    /// Deletions to apply.
    pub chunk: Graves,
}

/// `applyChanges` request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApplyChangesRequest {
    /// The client's full change payload.
    pub changes: ChangeSet,
}

/// Structural summary of a replica, compared during `sanityCheck2`.
///
/// Serialized as `[cards, notes, revlog, graves, models, decks, deck_configs]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u64; 7]", into = "[u64; 7]")]
pub struct SanitySummary {
    /// Number of cards.
    pub cards: u64,
    /// Number of notes.
    pub notes: u64,
    /// Number of review log entries.
    pub revlog: u64,
    /// Number of graves.
    pub graves: u64,
    /// Number of note types.
    pub models: u64,
    /// Number of decks.
    pub decks: u64,
    /// Number of deck configs.
    pub deck_configs: u64,
}

impl From<[u64; 7]> for SanitySummary {
    fn from(counts: [u64; 7]) -> Self {
        let [cards, notes, revlog, graves, models, decks, deck_configs] = counts;
        Self {
            cards,
            notes,
            revlog,
            graves,
            models,
            decks,
            deck_configs,
        }
    }
}

impl From<SanitySummary> for [u64; 7] {
    fn from(summary: SanitySummary) -> Self {
        [
            summary.cards,
            summary.notes,
            summary.revlog,
            summary.graves,
            summary.models,
            summary.decks,
            summary.deck_configs,
        ]
    }
}

/// `sanityCheck2` request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SanityCheckRequest {
    /// The client's summary of its replica.
    pub client: SanitySummary,
}

/// `sanityCheck2` response.
///
/// A mismatch is not an error: the exchange completes and the client
/// decides whether to force a full sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SanityCheckResponse {
    /// Both replicas agree.
    Ok,
    /// The replicas diverged.
    Bad {
        /// What the client reported.
        #[serde(rename = "c")]
        client: SanitySummary,
        /// What the server computed.
        #[serde(rename = "s")]
        server: SanitySummary,
    },
}

impl SanityCheckResponse {
    /// Returns true if the replicas agree.
    pub fn is_ok(&self) -> bool {
        matches!(self, SanityCheckResponse::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn meta_request_accepts_either_version_key() {
        let req: MetaRequest =
            serde_json::from_value(json!({"c": 10, "cv": "ankidesktop,2.1.15,lin"})).unwrap();
        assert_eq!(req.protocol_version, 10);

        let req: MetaRequest =
            serde_json::from_value(json!({"v": 9, "cv": "ankidroid,2.9,android"})).unwrap();
        assert_eq!(req.protocol_version, 9);
    }

    #[test]
    fn meta_request_requires_client_version() {
        let result: Result<MetaRequest, _> = serde_json::from_value(json!({"c": 10}));
        assert!(result.is_err());
    }

    #[test]
    fn start_request_graves_are_optional() {
        let req: StartRequest =
            serde_json::from_value(json!({"minUsn": 4, "lnewer": false})).unwrap();
        assert_eq!(req.min_usn, 4);
        assert!(!req.client_newer);
        assert!(req.graves.is_none());

        let req: StartRequest = serde_json::from_value(
            json!({"minUsn": 4, "lnewer": true, "graves": {"cards": [1]}}),
        )
        .unwrap();
        assert_eq!(req.graves.unwrap().cards, vec![1]);
    }

    #[test]
    fn start_request_rejects_mistyped_usn() {
        let result: Result<StartRequest, _> =
            serde_json::from_value(json!({"minUsn": "4", "lnewer": true}));
        assert!(result.is_err());
    }

    #[test]
    fn sanity_summary_is_an_array() {
        let summary = SanitySummary {
            cards: 1,
            notes: 2,
            revlog: 3,
            graves: 4,
            models: 5,
            decks: 6,
            deck_configs: 7,
        };
        assert_eq!(serde_json::to_value(summary).unwrap(), json!([1, 2, 3, 4, 5, 6, 7]));

        let parsed: SanitySummary = serde_json::from_value(json!([1, 2, 3, 4, 5, 6, 7])).unwrap();
        assert_eq!(parsed, summary);

        let short: Result<SanitySummary, _> = serde_json::from_value(json!([1, 2]));
        assert!(short.is_err());
    }

    #[test]
    fn sanity_response_shapes() {
        assert_eq!(
            serde_json::to_value(SanityCheckResponse::Ok).unwrap(),
            json!({"status": "ok"})
        );

        let bad = SanityCheckResponse::Bad {
            client: SanitySummary::default(),
            server: SanitySummary {
                cards: 1,
                ..SanitySummary::default()
            },
        };
        assert_eq!(
            serde_json::to_value(&bad).unwrap(),
            json!({"status": "bad", "c": [0, 0, 0, 0, 0, 0, 0], "s": [1, 0, 0, 0, 0, 0, 0]})
        );
        assert!(!bad.is_ok());
    }

    #[test]
    fn refusal_shape() {
        assert_eq!(
            serde_json::to_value(MetaRefusal::new("too new")).unwrap(),
            json!({"cont": false, "msg": "too new"})
        );
    }
}
