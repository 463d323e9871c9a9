//! Channel transports
//!
//! A [`Transport`] opens one channel and hands back a [`ChannelLink`]: the
//! receiving end of the channel's events plus the sending end for outbound
//! emits. The WebSocket transport speaks Socket.IO; tests use the in-memory
//! transport in [`super::memory`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::events::{ChannelEvent, Emit, HandshakeAuth};
use super::wire::{self, EnginePacket, SocketPacket};

/// Error type for opening a channel
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Invalid channel URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {0}")]
    Scheme(String),

    #[error("Transport closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(err))
    }
}

/// Opens authenticated channels
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, auth: &HandshakeAuth) -> Result<ChannelLink, TransportError>;
}

/// One open channel
///
/// Dropping the link detaches the event receiver and stops any background
/// task driving the channel, so no event is observed after close.
#[derive(Debug)]
pub struct ChannelLink {
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    outbound: mpsc::UnboundedSender<Emit>,
    task: Option<JoinHandle<()>>,
}

impl ChannelLink {
    pub fn new(
        inbound: mpsc::UnboundedReceiver<ChannelEvent>,
        outbound: mpsc::UnboundedSender<Emit>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            inbound,
            outbound,
            task,
        }
    }

    /// Hand an emit to the channel
    ///
    /// Returns the emit back if the channel is already gone.
    #[allow(clippy::result_large_err)]
    pub fn send(&self, emit: Emit) -> Result<(), Emit> {
        self.outbound.send(emit).map_err(|err| err.0)
    }

    /// Next channel event; `None` once the transport side is gone
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.inbound.recv().await
    }
}

impl Drop for ChannelLink {
    fn drop(&mut self) {
        self.inbound.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// WebSocket transport
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket.IO client over a WebSocket
pub struct WebSocketTransport {
    endpoint: Url,
}

impl WebSocketTransport {
    pub fn new(socket_url: &Url) -> Result<Self, TransportError> {
        Ok(Self {
            endpoint: socket_io_endpoint(socket_url)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Engine.IO WebSocket endpoint for a server base URL
pub fn socket_io_endpoint(base: &Url) -> Result<Url, TransportError> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(TransportError::Scheme(other.to_string())),
    };

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Scheme(scheme.to_string()))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, auth: &HandshakeAuth) -> Result<ChannelLink, TransportError> {
        let (stream, _) = connect_async(self.endpoint.as_str()).await?;
        tracing::info!(endpoint = %self.endpoint, "WebSocket connected");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connect = SocketPacket::Connect(Some(auth.to_value()));

        let task = tokio::spawn(pump(stream, connect, inbound_tx, outbound_rx));
        Ok(ChannelLink::new(inbound_rx, outbound_tx, Some(task)))
    }
}

/// Drive one socket: decode frames into channel events, answer pings, and
/// write outbound emits until either side goes away
async fn pump(
    stream: WsStream,
    connect: SocketPacket,
    inbound: mpsc::UnboundedSender<ChannelEvent>,
    mut outbound: mpsc::UnboundedReceiver<Emit>,
) {
    let (mut sink, mut source) = stream.split();

    let reason = loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let packet = match wire::decode(text.as_str()) {
                        Ok(packet) => packet,
                        Err(e) => {
                            tracing::warn!(error = %e, frame = %text.as_str(), "Failed to decode channel frame");
                            continue;
                        }
                    };

                    let reply = match packet {
                        EnginePacket::Open(handshake) => {
                            tracing::debug!(sid = %handshake.sid, "Engine.IO handshake received");
                            Some(EnginePacket::Message(connect.clone()))
                        }
                        EnginePacket::Ping(data) => Some(EnginePacket::Pong(data)),
                        EnginePacket::Close => break "server closed the session".to_string(),
                        EnginePacket::Message(packet) => {
                            if inbound.send(ChannelEvent::from_packet(packet)).is_err() {
                                // Link dropped by the manager
                                return;
                            }
                            None
                        }
                        EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => None,
                    };

                    if let Some(reply) = reply {
                        if let Err(e) = sink.send(WsMessage::text(reply.encode())).await {
                            break e.to_string();
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break "connection closed".to_string(),
                Some(Ok(_)) => {} // Binary frames and control frames
                Some(Err(e)) => break e.to_string(),
            },
            emit = outbound.recv() => match emit {
                Some(emit) => {
                    let frame = EnginePacket::Message(emit.into_packet()).encode();
                    if let Err(e) = sink.send(WsMessage::text(frame)).await {
                        break e.to_string();
                    }
                }
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return;
                }
            },
        }
    };

    tracing::info!(reason = %reason, "WebSocket connection closing");
    let _ = inbound.send(ChannelEvent::Closed { reason });
}
