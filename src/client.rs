//! WebSocket transport: connect to a relay, drive sessions, publish events.

use std::{sync::Arc, time::Duration};

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::Mutex,
    time::{timeout_at, Instant},
};
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::{
    client_async, tungstenite::client::IntoClientRequest, tungstenite::Message, WebSocketStream,
};
use tracing::{debug, info};
use url::Url;

use crate::{
    codec::{Ack, ClientMessage, RelayMessage},
    error::{ClientError, TransportError},
    event::{Event, EventId},
    identity::{AuxRand, EventTemplate, SigningKey},
    session::{Phase, RelaySession},
    sink::EventSink,
};

/// Blanket trait for boxed async read/write streams.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

type WsStream = WebSocketStream<Box<dyn AsyncReadWrite + Unpin + Send>>;

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy, and split
/// it into a shareable write half and a single reader.
pub async fn connect(relay: &str, proxy: Option<&str>) -> Result<(Publisher, Inbound), TransportError> {
    let url = Url::parse(relay)?;
    let host = url.host_str().ok_or(TransportError::MissingHost)?;
    let port = url
        .port_or_known_default()
        .ok_or(TransportError::MissingPort)?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = proxy {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async(req, stream).await?;
    info!(relay, proxied = proxy.is_some(), "connected");
    Ok(split(relay, ws))
}

fn split(relay: &str, ws: WsStream) -> (Publisher, Inbound) {
    let relay: Arc<str> = Arc::from(relay);
    let (writer, reader) = ws.split();
    (
        Publisher {
            relay: Arc::clone(&relay),
            writer: Arc::new(Mutex::new(writer)),
        },
        Inbound { relay, reader },
    )
}

/// A signed event that has been written to the relay. Its id correlates with
/// a later `OK` acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub id: EventId,
    pub event: Event,
}

/// Cloneable write half of a relay connection.
#[derive(Clone)]
pub struct Publisher {
    relay: Arc<str>,
    writer: Arc<Mutex<SplitSink<WsStream, Message>>>,
}

impl Publisher {
    /// Frame and write one message.
    pub async fn send(&self, msg: &ClientMessage) -> Result<(), ClientError> {
        let text = msg.encode()?;
        self.writer.lock().await.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Send the session's `REQ`.
    pub async fn subscribe(&self, session: &RelaySession) -> Result<(), ClientError> {
        debug!(relay = %self.relay, subscription = session.subscription_id(), "subscribing");
        self.send(&session.request()).await
    }

    /// Sign `template` and publish it. Nothing is written if signing fails.
    /// No retry is attempted on write failure.
    pub async fn submit(
        &self,
        key: &SigningKey,
        template: EventTemplate,
    ) -> Result<Submission, ClientError> {
        let event = template.sign(key, AuxRand::Random)?;
        self.publish(event).await
    }

    /// Publish an already signed event.
    pub async fn publish(&self, event: Event) -> Result<Submission, ClientError> {
        let id = event.id;
        self.send(&ClientMessage::Event(event.clone())).await?;
        info!(relay = %self.relay, event_id = %id, "event submitted");
        Ok(Submission { id, event })
    }

    /// Cancel a subscription, dropping its unflushed backlog.
    pub async fn unsubscribe(&self, session: RelaySession) -> Result<(), ClientError> {
        self.send(&session.close()).await
    }

    /// Close the WebSocket.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.writer.lock().await.close().await?;
        Ok(())
    }
}

/// Read half of a relay connection. One task owns it and drives every
/// session on the connection, which keeps each session single-writer.
pub struct Inbound {
    relay: Arc<str>,
    reader: SplitStream<WsStream>,
}

impl Inbound {
    /// Next text frame, or `None` once the relay closes the connection.
    pub async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        while let Some(msg) = self.reader.next().await {
            match msg? {
                Message::Text(txt) => return Ok(Some(txt)),
                Message::Close(_) => break,
                _ => {}
            }
        }
        info!(relay = %self.relay, "connection closed");
        Ok(None)
    }

    /// Feed frames to `session` until the relay closes the connection.
    ///
    /// With `backlog_deadline`, fails with [`ClientError::BacklogTimeout`] if
    /// `EOSE` has not arrived in time; buffered events are not emitted.
    pub async fn drive<K: EventSink + ?Sized>(
        &mut self,
        session: &mut RelaySession,
        sink: &mut K,
        backlog_deadline: Option<Duration>,
    ) -> Result<(), ClientError> {
        // A deadline too far out to represent is no deadline.
        let deadline =
            backlog_deadline.and_then(|d| Instant::now().checked_add(d).map(|at| (d, at)));
        loop {
            let frame = match deadline {
                Some((limit, at)) if session.phase() == Phase::Backlog => {
                    match timeout_at(at, self.next_frame()).await {
                        Ok(frame) => frame?,
                        Err(_) => return Err(ClientError::BacklogTimeout(limit)),
                    }
                }
                _ => self.next_frame().await?,
            };
            let Some(frame) = frame else {
                return Ok(());
            };
            let outcome = session.handle_frame(&frame, sink)?;
            debug!(subscription = session.subscription_id(), ?outcome, "frame handled");
        }
    }

    /// Wait for the relay's `OK` for `id`, passing any other traffic to `sink`.
    ///
    /// Returns `None` if the connection closes first.
    pub async fn await_ack<K: EventSink + ?Sized>(
        &mut self,
        id: &EventId,
        sink: &mut K,
        wait: Duration,
    ) -> Result<Option<Ack>, ClientError> {
        let at = Instant::now().checked_add(wait);
        loop {
            let frame = match at {
                Some(at) => match timeout_at(at, self.next_frame()).await {
                    Ok(frame) => frame?,
                    Err(_) => return Err(ClientError::AckTimeout(*id)),
                },
                None => self.next_frame().await?,
            };
            let Some(frame) = frame else {
                return Ok(None);
            };
            match RelayMessage::decode(&frame) {
                Ok(RelayMessage::Ok(ack)) if ack.event_id == *id => return Ok(Some(ack)),
                Ok(RelayMessage::Notice(text)) => sink.on_notice(&text),
                Ok(RelayMessage::Ok(ack)) => sink.on_ack(&ack),
                _ => sink.on_raw(&frame),
            }
        }
    }
}
