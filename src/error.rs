//! Error types, one enum per failure domain.

use std::{io, path::PathBuf, time::Duration};

use crate::event::EventId;

/// A frame could not be turned into a [`crate::codec::RelayMessage`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{tag} frame has {found} elements, expected {expected}")]
    Arity {
        tag: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{tag} frame has a malformed {field}")]
    Field {
        tag: &'static str,
        field: &'static str,
    },

    #[error("{tag} frame carries a malformed event: {source}")]
    Event {
        tag: &'static str,
        source: serde_json::Error,
    },
}

/// Canonical serialization failed.
#[derive(Debug, thiserror::Error)]
#[error("canonical encoding failed: {0}")]
pub struct EncodeError(#[from] pub serde_json::Error);

/// An inbound event failed id recomputation or signature verification.
#[derive(Debug, thiserror::Error)]
pub enum InvalidEvent {
    #[error("id mismatch: computed {computed}, event claims {claimed}")]
    IdMismatch { computed: EventId, claimed: EventId },

    #[error("pubkey is not a valid x-only public key")]
    BadPubkey,

    #[error("signature does not verify")]
    BadSignature,

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Outbound event construction failed; nothing was sent.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid content: {0}")]
    InvalidContent(String),

    #[error("malformed signing key: {0}")]
    SigningKey(String),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Event store failure. These are propagated, never swallowed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] io::Error),

    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("stored event {path} is invalid: {source}")]
    Invalid { path: PathBuf, source: InvalidEvent },
}

/// Connecting to, reading from, or writing to the relay failed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid relay url: {0}")]
    Url(#[from] url::ParseError),

    #[error("relay url has no host")]
    MissingHost,

    #[error("relay url has no port")]
    MissingPort,

    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error("socks proxy error: {0}")]
    Socks(#[from] tokio_socks::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Errors surfaced by the connection driver.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("relay did not finish the backlog within {0:?}")]
    BacklogTimeout(Duration),

    #[error("relay did not acknowledge event {0} in time")]
    AckTimeout(EventId),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.into())
    }
}
