//! Realtime channel to the chat backend
//!
//! Carries message pushes, acknowledged sends and the conversation room join
//! over a Socket.IO channel.
//!
//! # Architecture
//!
//! - **Wire**: Engine.IO / Socket.IO text packet codec
//! - **Events**: Channel events and chat payload shapes
//! - **Transport**: Opens one authenticated channel (WebSocket or in-memory)
//! - **Room**: Conversation join gating
//! - **Connection**: Lifecycle state machine with credential renewal and reconnect

pub mod connection;
pub mod events;
pub mod memory;
pub mod room;
pub mod transport;
pub mod wire;

pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionSettings, ConnectionState, Incoming,
    ReconnectPolicy, Recovery,
};
pub use events::{ChannelEvent, Emit, HandshakeAuth, PushFrame};
pub use memory::{MemoryListener, MemoryPeer, MemoryTransport};
pub use transport::{ChannelLink, Transport, TransportError, WebSocketTransport};
