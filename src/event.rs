//! Nostr event model.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Well-known event kinds. The core treats kinds as opaque; these exist for
/// callers and the terminal sink.
pub mod kind {
    /// Profile metadata.
    pub const METADATA: u32 = 0;
    /// Short text note.
    pub const TEXT_NOTE: u32 = 1;
    /// Relay recommendation.
    pub const RECOMMEND_RELAY: u32 = 2;
    /// Public chat channel message.
    pub const CHANNEL_MESSAGE: u32 = 42;
    /// Frequent high-volume kind some relays relay in bulk. Stored, but
    /// hidden from the terminal feed.
    pub const HIGH_VOLUME: u32 = 70202;
}

/// 32-byte SHA-256 event identifier, hex encoded on the wire.
///
/// Ordering is byte-wise, which matches ordering of the lowercase hex form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId([u8; 32]);

impl EventId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.to_hex())
    }
}

impl FromStr for EventId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data, e.g. `["p", <pubkey>]` or `["t", "news"]`.
/// The core hashes tags but never interprets them, so each one is kept
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    /// The tag's type marker (its first element), if any.
    pub fn kind(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }
}

/// A signed Nostr event.
///
/// Field order is the wire order and must not change: the serialized form is
/// what other clients see and re-hash.
///
/// ```json
/// {
///   "id": "<64 hex>",
///   "pubkey": "<64 hex>",
///   "created_at": 1700000000,
///   "kind": 1,
///   "tags": [["t", "news"]],
///   "content": "hello",
///   "sig": "<128 hex>"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// SHA-256 of the canonical unsigned tuple.
    pub id: EventId,
    /// Author x-only public key (hex).
    pub pubkey: String,
    /// Unix timestamp supplied by the author.
    pub created_at: i64,
    /// Kind number, e.g. `1` for a text note.
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
    /// BIP-340 Schnorr signature over `id` (hex).
    pub sig: String,
}
