//! Per-subscription state machine reconciling a relay's stored backlog with
//! its live stream.
//!
//! A session starts in [`Phase::Backlog`]. Valid, previously unseen events are
//! persisted and held in `pending` until the relay sends `EOSE`; the buffer is
//! then sorted by `(created_at, id)` and flushed to the sink in one go, and
//! the session turns [`Phase::Live`], where events are emitted as they
//! arrive. An id is emitted at most once per session, and never if the store
//! already held it.
//!
//! A session is driven by a single task. It is not reentrant.

use std::{collections::HashSet, sync::Arc};

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    codec::{ClientMessage, RelayMessage},
    error::{InvalidEvent, StoreError},
    event::{Event, EventId},
    identity::verify_event,
    sink::EventSink,
    store::EventStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for `EOSE`; accepted events are buffered.
    Backlog,
    /// Backlog flushed; accepted events are emitted immediately.
    Live,
}

/// What a single input did to the session.
#[derive(Debug)]
pub enum Outcome {
    /// Accepted and held until the backlog completes.
    Buffered,
    /// Accepted and delivered to the sink.
    Emitted,
    /// Already seen this session or already in the store.
    Duplicate,
    /// Failed id or signature verification; dropped.
    Rejected(InvalidEvent),
    /// Backlog completed; this many buffered events were delivered.
    Flushed(usize),
    /// Passed to the sink without touching session state.
    Forwarded,
    /// No effect (e.g. traffic for another subscription).
    Ignored,
}

pub struct RelaySession {
    subscription_id: String,
    filter: Value,
    phase: Phase,
    seen: HashSet<EventId>,
    pending: Vec<Event>,
    store: Arc<dyn EventStore>,
}

impl RelaySession {
    /// Create a session for `subscription_id`. The filter is forwarded to the
    /// relay verbatim.
    pub fn new(subscription_id: impl Into<String>, filter: Value, store: Arc<dyn EventStore>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            filter,
            phase: Phase::Backlog,
            seen: HashSet::new(),
            pending: Vec::new(),
            store,
        }
    }

    /// Create a session with a random v4 UUID as its subscription id.
    pub fn with_random_id(filter: Value, store: Arc<dyn EventStore>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), filter, store)
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The `REQ` frame that opens this subscription.
    pub fn request(&self) -> ClientMessage {
        ClientMessage::Req {
            subscription_id: self.subscription_id.clone(),
            filter: self.filter.clone(),
        }
    }

    /// Emit up to `limit` of the newest stored events, oldest first, and mark
    /// them seen so the relay's copies are not shown again.
    pub fn prime_from_store<K: EventSink + ?Sized>(
        &mut self,
        limit: usize,
        sink: &mut K,
    ) -> Result<usize, StoreError> {
        let history = self.store.most_recent(limit)?;
        let mut emitted = 0;
        for event in history {
            if self.seen.insert(event.id) {
                sink.on_event(&event);
                emitted += 1;
            }
        }
        debug!(subscription = %self.subscription_id, emitted, "primed from store");
        Ok(emitted)
    }

    /// Decode and apply one text frame. Undecodable frames go to the sink as
    /// raw diagnostics.
    pub fn handle_frame<K: EventSink + ?Sized>(
        &mut self,
        frame: &str,
        sink: &mut K,
    ) -> Result<Outcome, StoreError> {
        match RelayMessage::decode(frame) {
            Ok(msg) => self.handle_message(msg, sink),
            Err(err) => {
                warn!(subscription = %self.subscription_id, error = %err, "undecodable frame");
                sink.on_raw(frame);
                Ok(Outcome::Forwarded)
            }
        }
    }

    /// Apply one decoded relay message.
    pub fn handle_message<K: EventSink + ?Sized>(
        &mut self,
        msg: RelayMessage,
        sink: &mut K,
    ) -> Result<Outcome, StoreError> {
        match msg {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                if subscription_id != self.subscription_id {
                    debug!(subscription = %self.subscription_id, other = %subscription_id, "event for another subscription");
                    return Ok(Outcome::Ignored);
                }
                self.accept(event, sink)
            }
            RelayMessage::EndOfStoredEvents(subscription_id) => {
                if subscription_id != self.subscription_id {
                    debug!(subscription = %self.subscription_id, other = %subscription_id, "EOSE for another subscription");
                    return Ok(Outcome::Ignored);
                }
                Ok(self.end_backlog(sink))
            }
            RelayMessage::Notice(text) => {
                sink.on_notice(&text);
                Ok(Outcome::Forwarded)
            }
            RelayMessage::Ok(ack) => {
                sink.on_ack(&ack);
                Ok(Outcome::Forwarded)
            }
            RelayMessage::Unknown(raw) => {
                sink.on_raw(&raw);
                Ok(Outcome::Forwarded)
            }
        }
    }

    fn accept<K: EventSink + ?Sized>(
        &mut self,
        event: Event,
        sink: &mut K,
    ) -> Result<Outcome, StoreError> {
        if let Err(err) = verify_event(&event) {
            warn!(subscription = %self.subscription_id, event_id = %event.id, error = %err, "rejected invalid event");
            return Ok(Outcome::Rejected(err));
        }
        if self.seen.contains(&event.id) {
            debug!(event_id = %event.id, "duplicate within session");
            return Ok(Outcome::Duplicate);
        }
        let inserted = self.store.insert_if_absent(&event)?;
        self.seen.insert(event.id);
        if !inserted {
            debug!(event_id = %event.id, "already stored by an earlier session");
            return Ok(Outcome::Duplicate);
        }
        match self.phase {
            Phase::Backlog => {
                self.pending.push(event);
                Ok(Outcome::Buffered)
            }
            Phase::Live => {
                sink.on_event(&event);
                Ok(Outcome::Emitted)
            }
        }
    }

    fn end_backlog<K: EventSink + ?Sized>(&mut self, sink: &mut K) -> Outcome {
        if self.phase == Phase::Live {
            debug!(subscription = %self.subscription_id, "EOSE after backlog already flushed");
            return Outcome::Ignored;
        }
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|e| (e.created_at, e.id));
        for event in &pending {
            sink.on_event(event);
        }
        self.phase = Phase::Live;
        debug!(subscription = %self.subscription_id, flushed = pending.len(), "backlog complete, now live");
        Outcome::Flushed(pending.len())
    }

    /// Cancel the subscription. Buffered backlog events are dropped unseen.
    pub fn close(self) -> ClientMessage {
        if !self.pending.is_empty() {
            debug!(subscription = %self.subscription_id, dropped = self.pending.len(), "closing with unflushed backlog");
        }
        ClientMessage::Close(self.subscription_id)
    }
}
