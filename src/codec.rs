//! Canonical JSON codec and the NIP-01 message framing.
//!
//! Every byte that gets hashed or put on the wire goes through [`serialize`]:
//! compact `serde_json` output, struct fields in declaration order, minimal
//! integers, and only the escapes JSON requires (non-ASCII text is written
//! as raw UTF-8). Two clients that agree on this produce identical event ids.

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{DecodeError, EncodeError},
    event::{Event, EventId},
};

/// Serialize `value` to its canonical byte form.
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(value)?)
}

/// Inverse of [`serialize`].
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Messages a client sends to a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["REQ", <subscription id>, <filter>]`
    Req {
        subscription_id: String,
        filter: Value,
    },
    /// `["EVENT", <event>]`
    Event(Event),
    /// `["CLOSE", <subscription id>]`
    Close(String),
}

impl ClientMessage {
    /// Frame the message as a text payload.
    pub fn encode(&self) -> Result<String, EncodeError> {
        let text = match self {
            Self::Req {
                subscription_id,
                filter,
            } => serde_json::to_string(&("REQ", subscription_id, filter))?,
            Self::Event(event) => serde_json::to_string(&("EVENT", event))?,
            Self::Close(subscription_id) => serde_json::to_string(&("CLOSE", subscription_id))?,
        };
        Ok(text)
    }
}

/// Relay acknowledgment of a submitted event (`["OK", id, accepted, message]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub event_id: EventId,
    pub accepted: bool,
    pub message: String,
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.accepted { "accepted" } else { "rejected" };
        write!(f, "OK {} {verdict}", self.event_id)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Messages a relay sends to a client, decoded once at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["EVENT", <subscription id>, <event>]`
    Event {
        subscription_id: String,
        event: Event,
    },
    /// `["EOSE", <subscription id>]`: the stored backlog is complete.
    EndOfStoredEvents(String),
    /// `["NOTICE", <text>]`
    Notice(String),
    /// `["OK", <event id>, <accepted>, <message>]`
    Ok(Ack),
    /// Well-formed JSON with an unrecognized shape or tag; carries the raw frame.
    Unknown(String),
}

impl RelayMessage {
    /// Decode a text frame.
    ///
    /// Unknown tags are not errors; a known tag with the wrong shape is.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        let Some(items) = value.as_array() else {
            return Ok(Self::Unknown(text.to_string()));
        };
        match items.first().and_then(Value::as_str) {
            Some("EVENT") => {
                let [_, sub, event] = items.as_slice() else {
                    return Err(arity("EVENT", 3, items.len()));
                };
                let subscription_id = string_field("EVENT", "subscription id", sub)?;
                let event = Event::deserialize(event)
                    .map_err(|source| DecodeError::Event { tag: "EVENT", source })?;
                Ok(Self::Event {
                    subscription_id,
                    event,
                })
            }
            Some("EOSE") => {
                let [_, sub] = items.as_slice() else {
                    return Err(arity("EOSE", 2, items.len()));
                };
                Ok(Self::EndOfStoredEvents(string_field(
                    "EOSE",
                    "subscription id",
                    sub,
                )?))
            }
            Some("NOTICE") => {
                let [_, text] = items.as_slice() else {
                    return Err(arity("NOTICE", 2, items.len()));
                };
                Ok(Self::Notice(string_field("NOTICE", "message", text)?))
            }
            Some("OK") => {
                // Some relays omit the trailing message.
                let (id, accepted, message) = match items.as_slice() {
                    [_, id, accepted] => (id, accepted, None),
                    [_, id, accepted, message] => (id, accepted, Some(message)),
                    _ => return Err(arity("OK", 4, items.len())),
                };
                let event_id = id
                    .as_str()
                    .and_then(|s| EventId::from_hex(s).ok())
                    .ok_or(DecodeError::Field {
                        tag: "OK",
                        field: "event id",
                    })?;
                let accepted = accepted.as_bool().ok_or(DecodeError::Field {
                    tag: "OK",
                    field: "accepted flag",
                })?;
                let message = match message {
                    Some(m) => string_field("OK", "message", m)?,
                    None => String::new(),
                };
                Ok(Self::Ok(Ack {
                    event_id,
                    accepted,
                    message,
                }))
            }
            _ => Ok(Self::Unknown(text.to_string())),
        }
    }
}

fn arity(tag: &'static str, expected: usize, found: usize) -> DecodeError {
    DecodeError::Arity {
        tag,
        expected,
        found,
    }
}

fn string_field(tag: &'static str, field: &'static str, value: &Value) -> Result<String, DecodeError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or(DecodeError::Field { tag, field })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;
    use serde_json::json;

    fn sample_event() -> Event {
        Event {
            id: EventId::from_bytes([0x11; 32]),
            pubkey: "ab".repeat(32),
            created_at: 1_669_524_090,
            kind: 1,
            tags: vec![Tag::new(["t", "nostr"])],
            content: "héllo \"world\"\n".into(),
            sig: "cd".repeat(64),
        }
    }

    #[test]
    fn serialize_is_compact_and_keeps_unicode() {
        let bytes = serialize(&(0, "pk", 5i64, 1u32, Vec::<Tag>::new(), "é\t\"")).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "[0,\"pk\",5,1,[],\"é\\t\\\"\"]"
        );
    }

    #[test]
    fn serialize_is_deterministic() {
        let ev = sample_event();
        let a = serialize(&ev).unwrap();
        let b = serialize(&ev.clone()).unwrap();
        assert_eq!(a, b);
        let back: Event = deserialize(&a).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn encodes_client_messages() {
        let req = ClientMessage::Req {
            subscription_id: "sub".into(),
            filter: json!({"limit": 100, "since": 1669524090}),
        };
        assert_eq!(
            req.encode().unwrap(),
            r#"["REQ","sub",{"limit":100,"since":1669524090}]"#
        );
        assert_eq!(
            ClientMessage::Close("sub".into()).encode().unwrap(),
            r#"["CLOSE","sub"]"#
        );
        let ev = sample_event();
        let framed = ClientMessage::Event(ev.clone()).encode().unwrap();
        assert!(framed.starts_with(r#"["EVENT",{"id":""#));
        assert_eq!(
            framed,
            format!("[\"EVENT\",{}]", serde_json::to_string(&ev).unwrap())
        );
    }

    #[test]
    fn decodes_relay_messages() {
        let ev = sample_event();
        let frame = json!(["EVENT", "sub", ev]).to_string();
        assert_eq!(
            RelayMessage::decode(&frame).unwrap(),
            RelayMessage::Event {
                subscription_id: "sub".into(),
                event: ev.clone()
            }
        );
        assert_eq!(
            RelayMessage::decode(r#"["EOSE","sub"]"#).unwrap(),
            RelayMessage::EndOfStoredEvents("sub".into())
        );
        assert_eq!(
            RelayMessage::decode(r#"["NOTICE","slow down"]"#).unwrap(),
            RelayMessage::Notice("slow down".into())
        );
        let ok = json!(["OK", ev.id, false, "blocked: spam"]).to_string();
        assert_eq!(
            RelayMessage::decode(&ok).unwrap(),
            RelayMessage::Ok(Ack {
                event_id: ev.id,
                accepted: false,
                message: "blocked: spam".into()
            })
        );
    }

    #[test]
    fn unknown_shapes_are_not_errors() {
        let raw = r#"["AUTH","challenge"]"#;
        assert_eq!(
            RelayMessage::decode(raw).unwrap(),
            RelayMessage::Unknown(raw.into())
        );
        assert_eq!(
            RelayMessage::decode(r#"{"hello":1}"#).unwrap(),
            RelayMessage::Unknown(r#"{"hello":1}"#.into())
        );
        assert_eq!(
            RelayMessage::decode("[]").unwrap(),
            RelayMessage::Unknown("[]".into())
        );
    }

    #[test]
    fn malformed_known_frames_are_errors() {
        assert!(matches!(
            RelayMessage::decode("not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            RelayMessage::decode(r#"["EOSE"]"#),
            Err(DecodeError::Arity { tag: "EOSE", .. })
        ));
        assert!(matches!(
            RelayMessage::decode(r#"["NOTICE",5]"#),
            Err(DecodeError::Field { tag: "NOTICE", .. })
        ));
        assert!(matches!(
            RelayMessage::decode(r#"["EVENT","sub",{"id":"zz"}]"#),
            Err(DecodeError::Event { tag: "EVENT", .. })
        ));
    }
}
