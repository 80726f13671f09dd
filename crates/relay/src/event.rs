//! Signed protocol events.
//!
//! An event is addressed by its author's public key and a list of routing
//! tags. Its id commits to the author and the canonical bytes; its signature
//! commits to the canonical bytes. Both are checked by [`ProtocolEvent::verify`]
//! before an event is handed to any higher layer.

use crate::error::{RelayError, RelayResult};
use ridemesh_core::current_timestamp_ms;
use ridemesh_crypto::{verify_signature, SigningIdentity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag key for the geocell an event is relevant to
pub const TAG_GEOCELL: &str = "g";
/// Tag key for a recipient public key
pub const TAG_RECIPIENT: &str = "p";
/// Tag key for a topic
pub const TAG_TOPIC: &str = "t";
/// Tag key for a ride id
pub const TAG_RIDE: &str = "r";
/// Tag key identifying a replaceable event within its kind and author
pub const TAG_REPLACEABLE: &str = "d";

/// Kinds of protocol event, with stable numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum EventKind {
    DriverAnnouncement,
    RideRequest,
    Candidacy,
    RideAcceptance,
    RideStatusUpdate,
}

impl EventKind {
    pub const fn code(&self) -> u32 {
        match self {
            EventKind::DriverAnnouncement => 30100,
            EventKind::RideRequest => 3101,
            EventKind::Candidacy => 3102,
            EventKind::RideAcceptance => 3103,
            EventKind::RideStatusUpdate => 3104,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            30100 => Some(EventKind::DriverAnnouncement),
            3101 => Some(EventKind::RideRequest),
            3102 => Some(EventKind::Candidacy),
            3103 => Some(EventKind::RideAcceptance),
            3104 => Some(EventKind::RideStatusUpdate),
            _ => None,
        }
    }

    /// Replaceable kinds keep only the latest event per author and `d` tag.
    pub fn is_replaceable(&self) -> bool {
        (30000..40000).contains(&self.code())
    }
}

impl TryFrom<u32> for EventKind {
    type Error = String;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        EventKind::from_code(code).ok_or_else(|| format!("unknown event kind {}", code))
    }
}

impl From<EventKind> for u32 {
    fn from(kind: EventKind) -> Self {
        kind.code()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// A `(key, value)` routing tag. Serialized as a two-element array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag(pub String, pub String);

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Tag(key.into(), value.into())
    }

    pub fn key(&self) -> &str {
        &self.0
    }

    pub fn value(&self) -> &str {
        &self.1
    }
}

/// Signed, content-addressed protocol event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEvent {
    /// Hex BLAKE3 of the author key and canonical bytes
    pub id: String,
    pub kind: EventKind,
    /// Milliseconds since the Unix epoch, by the author's clock
    pub created_at: u64,
    pub tags: Vec<Tag>,
    pub content: String,
    /// Hex-encoded Ed25519 signature over the canonical bytes
    pub signature: String,
    /// Author's hex-encoded public key
    pub public_key: String,
}

/// Canonical byte serialization signed by the author.
pub fn canonical_bytes(
    kind: EventKind,
    created_at: u64,
    tags: &[Tag],
    content: &str,
) -> RelayResult<Vec<u8>> {
    Ok(serde_json::to_vec(&(kind.code(), created_at, tags, content))?)
}

fn compute_id(public_key: &str, canonical: &[u8]) -> RelayResult<String> {
    let key_bytes = hex::decode(public_key).map_err(|e| RelayError::InvalidEvent {
        reason: format!("public key is not hex: {}", e),
    })?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&key_bytes);
    hasher.update(canonical);
    Ok(hasher.finalize().to_hex().to_string())
}

impl ProtocolEvent {
    /// Check the id and the signature.
    pub fn verify(&self) -> RelayResult<()> {
        let canonical = canonical_bytes(self.kind, self.created_at, &self.tags, &self.content)?;

        let expected_id = compute_id(&self.public_key, &canonical)?;
        if expected_id != self.id {
            return Err(RelayError::IdMismatch {
                event_id: self.id.clone(),
            });
        }

        let signature = hex::decode(&self.signature).map_err(|_| RelayError::InvalidSignature {
            event_id: self.id.clone(),
        })?;
        if !verify_signature(&canonical, &signature, &self.public_key) {
            return Err(RelayError::InvalidSignature {
                event_id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// First value of the tag `key`.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags.iter().find(|t| t.key() == key).map(Tag::value)
    }

    /// Every value of the tag `key`.
    pub fn tag_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.key() == key)
            .map(Tag::value)
    }

    /// Identity of the slot a replaceable event occupies.
    pub fn replaceable_key(&self) -> Option<(EventKind, String, String)> {
        if !self.kind.is_replaceable() {
            return None;
        }
        let d = self.tag_value(TAG_REPLACEABLE).unwrap_or_default();
        Some((self.kind, self.public_key.clone(), d.to_string()))
    }

    /// Whether `self` supersedes `other` in the same replaceable slot.
    ///
    /// Later `created_at` wins; ties break on the larger id so every relay
    /// converges on the same event.
    pub fn supersedes(&self, other: &ProtocolEvent) -> bool {
        (self.created_at, &self.id) > (other.created_at, &other.id)
    }
}

/// Builds and signs a [`ProtocolEvent`].
#[derive(Debug, Clone)]
pub struct EventBuilder {
    kind: EventKind,
    created_at: Option<u64>,
    tags: Vec<Tag>,
    content: String,
}

impl EventBuilder {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            created_at: None,
            tags: Vec::new(),
            content: String::new(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Override the creation time (defaults to now).
    pub fn created_at(mut self, created_at: u64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn sign(self, identity: &SigningIdentity) -> RelayResult<ProtocolEvent> {
        let created_at = self.created_at.unwrap_or_else(current_timestamp_ms);
        let canonical = canonical_bytes(self.kind, created_at, &self.tags, &self.content)?;
        let signature = identity.sign(&canonical)?;
        let public_key = identity.public_key().to_string();
        let id = compute_id(&public_key, &canonical)?;

        Ok(ProtocolEvent {
            id,
            kind: self.kind,
            created_at,
            tags: self.tags,
            content: self.content,
            signature: hex::encode(signature),
            public_key,
        })
    }
}
