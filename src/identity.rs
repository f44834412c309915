//! Event identity: canonical hashing, BIP-340 signing, and verification.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use rand::RngCore;
use secp256k1::{schnorr::Signature, Keypair, Message, Secp256k1, XOnlyPublicKey};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{
    codec,
    error::{EncodeError, IdentityError, InvalidEvent},
    event::{kind, Event, EventId, Tag},
};

/// A secp256k1 keypair used to sign outbound events.
#[derive(Clone)]
pub struct SigningKey {
    keypair: Keypair,
    pubkey_hex: String,
}

impl SigningKey {
    /// Build a key from 32 raw secret bytes.
    pub fn from_slice(secret: &[u8]) -> Result<Self, IdentityError> {
        if secret.len() != 32 {
            return Err(IdentityError::SigningKey(format!(
                "expected 32 bytes, got {}",
                secret.len()
            )));
        }
        let secp = Secp256k1::signing_only();
        let keypair = Keypair::from_seckey_slice(&secp, secret)
            .map_err(|e| IdentityError::SigningKey(e.to_string()))?;
        let pubkey_hex = hex::encode(keypair.x_only_public_key().0.serialize());
        Ok(Self {
            keypair,
            pubkey_hex,
        })
    }

    /// Build a key from 64 hex characters.
    pub fn from_hex(secret: &str) -> Result<Self, IdentityError> {
        let bytes =
            hex::decode(secret.trim()).map_err(|e| IdentityError::SigningKey(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Hex x-only public key, as it appears in `Event::pubkey`.
    pub fn public_key_hex(&self) -> &str {
        &self.pubkey_hex
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("pubkey", &self.pubkey_hex)
            .finish_non_exhaustive()
    }
}

/// Auxiliary randomness mixed into a BIP-340 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxRand {
    /// Fresh bytes from the thread RNG for every signature.
    Random,
    /// Caller-chosen bytes. Only for deterministic tests; never reuse across
    /// messages with a real key.
    Fixed([u8; 32]),
}

impl AuxRand {
    fn bytes(self) -> [u8; 32] {
        match self {
            Self::Random => {
                let mut aux = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut aux);
                aux
            }
            Self::Fixed(aux) => aux,
        }
    }
}

/// Compute the event id: SHA-256 over `[0, pubkey, created_at, kind, tags, content]`.
pub fn compute_id(
    pubkey: &str,
    created_at: i64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> Result<EventId, EncodeError> {
    let data = codec::serialize(&(0, pubkey, created_at, kind, tags, content))?;
    Ok(EventId::from_bytes(Sha256::digest(&data).into()))
}

/// Build and sign a new event.
pub fn build_event(
    content: &str,
    created_at: i64,
    kind: u32,
    tags: Vec<Tag>,
    key: &SigningKey,
    aux: AuxRand,
) -> Result<Event, IdentityError> {
    let pubkey = key.public_key_hex().to_string();
    let id = compute_id(&pubkey, created_at, kind, &tags, content)?;
    let secp = Secp256k1::signing_only();
    let msg = Message::from_digest(*id.as_bytes());
    let sig = secp.sign_schnorr_with_aux_rand(&msg, &key.keypair, &aux.bytes());
    Ok(Event {
        id,
        pubkey,
        created_at,
        kind,
        tags,
        content: content.to_string(),
        sig: hex::encode(sig.as_ref()),
    })
}

/// Check an event's id against its fields, then its signature against the id.
pub fn verify_event(event: &Event) -> Result<(), InvalidEvent> {
    let computed = compute_id(
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    )?;
    if computed != event.id {
        return Err(InvalidEvent::IdMismatch {
            computed,
            claimed: event.id,
        });
    }
    let pubkey = hex::decode(&event.pubkey)
        .ok()
        .and_then(|bytes| XOnlyPublicKey::from_slice(&bytes).ok())
        .ok_or(InvalidEvent::BadPubkey)?;
    let sig = hex::decode(&event.sig)
        .ok()
        .and_then(|bytes| Signature::from_slice(&bytes).ok())
        .ok_or(InvalidEvent::BadSignature)?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest(*computed.as_bytes());
    secp.verify_schnorr(&sig, &msg, &pubkey)
        .map_err(|_| InvalidEvent::BadSignature)
}

pub fn is_valid(event: &Event) -> bool {
    verify_event(event).is_ok()
}

/// Decode untrusted content bytes.
pub fn content_from_bytes(bytes: Vec<u8>) -> Result<String, IdentityError> {
    String::from_utf8(bytes).map_err(|e| IdentityError::InvalidContent(e.to_string()))
}

/// Convert a JSON array of string arrays into tags.
pub fn tags_from_value(value: &Value) -> Result<Vec<Tag>, IdentityError> {
    let rows = value
        .as_array()
        .ok_or_else(|| IdentityError::InvalidContent("tags must be an array".into()))?;
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let fields = row.as_array().ok_or_else(|| {
                IdentityError::InvalidContent(format!("tag {i} is not an array"))
            })?;
            fields
                .iter()
                .map(|f| {
                    f.as_str().map(str::to_string).ok_or_else(|| {
                        IdentityError::InvalidContent(format!("tag {i} has a non-string element"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Tag)
        })
        .collect()
}

/// Unsigned event fields supplied by a caller before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub content: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Tag>,
}

impl EventTemplate {
    /// A text note stamped with the current time.
    pub fn text_note(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            created_at: unix_now(),
            kind: kind::TEXT_NOTE,
            tags: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: u32) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn sign(self, key: &SigningKey, aux: AuxRand) -> Result<Event, IdentityError> {
        build_event(
            &self.content,
            self.created_at,
            self.kind,
            self.tags,
            key,
            aux,
        )
    }
}

/// Seconds since the Unix epoch; zero if the clock is before it.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
