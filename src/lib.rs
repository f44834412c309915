//! Nostr relay client core.
//!
//! - [`identity`] builds, signs, and verifies events.
//! - [`codec`] frames and decodes NIP-01 messages.
//! - [`session`] reconciles a relay's stored backlog with its live stream,
//!   emitting each event once and in order.
//! - [`store`] persists events for deduplication across runs.
//! - [`client`] carries sessions over a WebSocket.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod session;
pub mod sink;
pub mod store;

pub use codec::{Ack, ClientMessage, RelayMessage};
pub use error::{
    ClientError, DecodeError, EncodeError, IdentityError, InvalidEvent, StoreError, TransportError,
};
pub use event::{Event, EventId, Tag};
pub use identity::{build_event, verify_event, AuxRand, EventTemplate, SigningKey};
pub use session::{Outcome, Phase, RelaySession};
pub use sink::EventSink;
pub use store::{EventStore, FileStore, MemoryStore};
