//! Nostr event model and the per-field file representation.

use serde::{Deserialize, Serialize};

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. Common examples include:
///
/// - `p` – references another author's public key
/// - `e` – links to another event ID
/// - `d` – unique identifier for replaceable events
/// - `t` – free-form topic or hashtag
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved. For
/// example, a `["t", "news"]` tag from the protocol is represented as
/// `Tag(vec!["t".into(), "news".into()])`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Tag key (first element), if any.
    pub fn key(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Values following the key.
    pub fn values(&self) -> &[String] {
        self.0.get(1..).unwrap_or(&[])
    }
}

/// Core Nostr event persisted in the store and exposed as a directory.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "npub...",
///   "kind": 1,
///   "created_at": 1700000000,
///   "tags": [["t", "news"], ["d", "slug"]],
///   "content": "hello",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `1` or `30023`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Arbitrary tags such as `d` (identifier) or `t` (topic).
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

/// One of the files inside an event directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventField {
    Id,
    Pubkey,
    Kind,
    Tags,
    Content,
    Sig,
}

impl EventField {
    /// Every field, in directory listing order.
    pub const ALL: [EventField; 6] = [
        EventField::Id,
        EventField::Pubkey,
        EventField::Kind,
        EventField::Tags,
        EventField::Content,
        EventField::Sig,
    ];

    /// File name of the field inside an event directory.
    pub fn name(self) -> &'static str {
        match self {
            EventField::Id => "id",
            EventField::Pubkey => "pubkey",
            EventField::Kind => "kind",
            EventField::Tags => "tags",
            EventField::Content => "content",
            EventField::Sig => "sig",
        }
    }

    /// Parse a file name; only the exact names above are recognized.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }
}

impl std::fmt::Display for EventField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Event {
    /// Bytes served for `field`.
    ///
    /// Strings are served verbatim as UTF-8, `kind` as decimal text and
    /// `tags` as a compact JSON array of arrays.
    pub fn field_bytes(&self, field: EventField) -> Vec<u8> {
        match field {
            EventField::Id => self.id.as_bytes().to_vec(),
            EventField::Pubkey => self.pubkey.as_bytes().to_vec(),
            EventField::Kind => self.kind.to_string().into_bytes(),
            // Serializing plain strings cannot fail.
            EventField::Tags => serde_json::to_vec(&self.tags).unwrap_or_default(),
            EventField::Content => self.content.as_bytes().to_vec(),
            EventField::Sig => self.sig.as_bytes().to_vec(),
        }
    }
}
