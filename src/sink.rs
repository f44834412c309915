//! Presentation sink: where a session delivers ordered, deduplicated output.

use std::io::Write;

use tracing::debug;

use crate::{
    codec::Ack,
    event::{kind, Event},
};

/// Consumer of session output. The core never renders anything itself.
pub trait EventSink {
    fn on_event(&mut self, event: &Event);

    fn on_notice(&mut self, text: &str);

    /// Diagnostics: unknown or undecodable frames.
    fn on_raw(&mut self, raw: &str);

    /// Relay acknowledgment of a submitted event. Defaults to a diagnostic.
    fn on_ack(&mut self, ack: &Ack) {
        self.on_raw(&ack.to_string());
    }
}

/// Everything a sink can receive, in delivery order.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(Event),
    Notice(String),
    Raw(String),
    Ack(Ack),
}

/// Sink that keeps every delivery in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub deliveries: Vec<Delivery>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivered events only, in order.
    pub fn events(&self) -> Vec<&Event> {
        self.deliveries
            .iter()
            .filter_map(|d| match d {
                Delivery::Event(ev) => Some(ev),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn on_event(&mut self, event: &Event) {
        self.deliveries.push(Delivery::Event(event.clone()));
    }

    fn on_notice(&mut self, text: &str) {
        self.deliveries.push(Delivery::Notice(text.to_string()));
    }

    fn on_raw(&mut self, raw: &str) {
        self.deliveries.push(Delivery::Raw(raw.to_string()));
    }

    fn on_ack(&mut self, ack: &Ack) {
        self.deliveries.push(Delivery::Ack(ack.clone()));
    }
}

/// Abbreviate a hex key or id as `abcd...wxyz`.
pub fn short_id(hex: &str) -> String {
    if hex.len() <= 8 || !hex.is_ascii() {
        return hex.to_string();
    }
    format!("{}...{}", &hex[..4], &hex[hex.len() - 4..])
}

/// Line-oriented terminal output: `<author> <content>` per text note.
pub struct PrintSink<W: Write> {
    out: W,
    write_failed: bool,
}

impl<W: Write> PrintSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            write_failed: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        let written = writeln!(self.out, "{text}").and_then(|()| self.out.flush());
        if let Err(e) = written {
            if !self.write_failed {
                debug!(error = %e, "terminal output failed");
                self.write_failed = true;
            }
        }
    }
}

impl<W: Write> EventSink for PrintSink<W> {
    fn on_event(&mut self, event: &Event) {
        let line = match event.kind {
            kind::TEXT_NOTE | kind::CHANNEL_MESSAGE => {
                format!("{} {}", short_id(&event.pubkey), event.content)
            }
            kind::HIGH_VOLUME => return,
            other => format!("{} <event of kind {other}>", short_id(&event.pubkey)),
        };
        self.line(&line);
    }

    fn on_notice(&mut self, text: &str) {
        self.line(&format!("NOTICE {text}"));
    }

    fn on_raw(&mut self, raw: &str) {
        self.line(raw);
    }
}
