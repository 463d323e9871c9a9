//! In-memory transport
//!
//! Every `open` produces a [`MemoryPeer`] holding the far end of the channel,
//! delivered through a [`MemoryListener`]. The peer sees the handshake
//! credential and the emits, and pushes events back, which makes the
//! connection manager drivable without a network.

use async_trait::async_trait;
use serde_json::Value;
use supportchat_shared::AckResponse;
use tokio::sync::mpsc;

use super::events::{ChannelEvent, Emit, HandshakeAuth, RECEIVE_MESSAGE};
use super::transport::{ChannelLink, Transport, TransportError};

/// Transport whose channels live in process memory
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

/// Receives the far end of each channel opened on a [`MemoryTransport`]
pub struct MemoryListener {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { peers: tx }, MemoryListener { peers: rx })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, auth: &HandshakeAuth) -> Result<ChannelLink, TransportError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (emit_tx, emit_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            auth: auth.clone(),
            events: event_tx,
            emits: emit_rx,
        };
        self.peers.send(peer).map_err(|_| TransportError::Closed)?;

        Ok(ChannelLink::new(event_rx, emit_tx, None))
    }
}

impl MemoryListener {
    /// Wait for the next channel to be opened
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

/// Server side of one in-memory channel
pub struct MemoryPeer {
    auth: HandshakeAuth,
    events: mpsc::UnboundedSender<ChannelEvent>,
    emits: mpsc::UnboundedReceiver<Emit>,
}

impl MemoryPeer {
    /// Credential presented when the channel was opened
    pub fn auth(&self) -> &HandshakeAuth {
        &self.auth
    }

    /// Push an event to the client; false once the client closed the channel
    pub fn push(&self, event: ChannelEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn accept_handshake(&self) -> bool {
        self.push(ChannelEvent::Connected {
            sid: Some("memory".to_string()),
        })
    }

    pub fn reject_handshake(&self, message: &str) -> bool {
        self.push(ChannelEvent::AuthRejected {
            message: message.to_string(),
        })
    }

    /// Push a `receiveMessage` event
    pub fn deliver(&self, payload: Value) -> bool {
        self.push(ChannelEvent::Event {
            name: RECEIVE_MESSAGE.to_string(),
            args: vec![payload],
        })
    }

    pub fn acknowledge(&self, id: u64, ack: &AckResponse) -> bool {
        let payload = serde_json::to_value(ack).unwrap_or(Value::Null);
        self.push(ChannelEvent::Ack {
            id,
            args: vec![payload],
        })
    }

    /// Simulate the transport dropping
    pub fn disconnect(self, reason: &str) {
        let _ = self.events.send(ChannelEvent::Closed {
            reason: reason.to_string(),
        });
    }

    pub async fn next_emit(&mut self) -> Option<Emit> {
        self.emits.recv().await
    }

    pub fn try_next_emit(&mut self) -> Option<Emit> {
        self.emits.try_recv().ok()
    }

    /// True once the client side of the channel has been dropped
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}
