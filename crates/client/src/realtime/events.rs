//! Realtime event types
//!
//! Defines the channel-level events exchanged between a transport and the
//! connection manager, and the payload shapes of the chat events.

use serde::Deserialize;
use serde_json::{json, Value};
use supportchat_shared::{ConversationId, MessageId};

use super::wire::SocketPacket;
use crate::auth::AccessToken;

/// Server push carrying a new message
pub const RECEIVE_MESSAGE: &str = "receiveMessage";

/// Client send of a user-authored message
pub const SEND_MESSAGE: &str = "sendMessage";

const JOIN_CONVERSATION_PREFIX: &str = "joinConversation_";

/// Name of the event that joins the room of a conversation
pub fn join_event(conversation_id: &ConversationId) -> String {
    format!("{}{}", JOIN_CONVERSATION_PREFIX, conversation_id)
}

// =============================================================================
// Transport-to-Manager Events
// =============================================================================

/// Events a transport delivers to the connection manager
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Handshake accepted, channel is live
    Connected { sid: Option<String> },

    /// Server refused the credential presented at handshake
    AuthRejected { message: String },

    /// Named event pushed by the server
    Event { name: String, args: Vec<Value> },

    /// Acknowledgement for an earlier emit
    Ack { id: u64, args: Vec<Value> },

    /// Underlying transport went away
    Closed { reason: String },
}

impl ChannelEvent {
    /// Map a decoded Socket.IO packet onto a channel event
    pub fn from_packet(packet: SocketPacket) -> Self {
        match packet {
            SocketPacket::Connect(payload) => ChannelEvent::Connected {
                sid: payload
                    .as_ref()
                    .and_then(|p| p.get("sid"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            SocketPacket::ConnectError(payload) => ChannelEvent::AuthRejected {
                message: connect_error_message(&payload),
            },
            SocketPacket::Event { name, args, .. } => ChannelEvent::Event { name, args },
            SocketPacket::Ack { id, args } => ChannelEvent::Ack { id, args },
            SocketPacket::Disconnect => ChannelEvent::Closed {
                reason: "server disconnected the socket".to_string(),
            },
        }
    }
}

fn connect_error_message(payload: &Value) -> String {
    match payload {
        Value::String(message) => message.clone(),
        Value::Object(fields) => fields
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("connection refused")
            .to_string(),
        _ => "connection refused".to_string(),
    }
}

// =============================================================================
// Manager-to-Transport Frames
// =============================================================================

/// One outbound event, optionally expecting an acknowledgement
#[derive(Debug, Clone, PartialEq)]
pub struct Emit {
    pub name: String,
    pub args: Vec<Value>,
    pub ack: Option<u64>,
}

impl Emit {
    pub fn into_packet(self) -> SocketPacket {
        SocketPacket::Event {
            ack: self.ack,
            name: self.name,
            args: self.args,
        }
    }
}

/// Credential presented in the Socket.IO connect packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeAuth {
    pub token: String,
}

impl HandshakeAuth {
    pub fn bearer(token: &AccessToken) -> Self {
        Self {
            token: token.bearer(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({ "token": self.token })
    }
}

// =============================================================================
// Chat Payloads
// =============================================================================

/// Payload of a `receiveMessage` push
///
/// The backend is inconsistent about the body key, so both `message` and
/// `text` are accepted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushFrame {
    pub id: MessageId,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<Value>,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_push_frame_deserialization() {
        let json = r#"{"id":"m1","text":"hello","sender_id":"admin-1","conversation_id":4}"#;
        let frame: PushFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.id, MessageId::from("m1"));
        assert_eq!(frame.message, None);
        assert_eq!(frame.text.as_deref(), Some("hello"));
        assert_eq!(frame.conversation_id, Some(ConversationId::from(4)));
    }

    #[test]
    fn test_push_frame_null_fields() {
        let json = r#"{"id":5,"message":"hi","sender_id":null,"conversation_id":null}"#;
        let frame: PushFrame = serde_json::from_str(json).unwrap();
        assert!(frame.sender_id.is_none());
        assert!(frame.conversation_id.is_none());
        assert!(frame.created_at.is_none());
    }

    #[test]
    fn test_join_event_name() {
        assert_eq!(join_event(&ConversationId::from(42)), "joinConversation_42");
    }

    #[test]
    fn test_connect_error_maps_to_auth_rejection() {
        let event = ChannelEvent::from_packet(SocketPacket::ConnectError(
            json!({"message": "invalid token"}),
        ));
        assert_eq!(
            event,
            ChannelEvent::AuthRejected {
                message: "invalid token".to_string()
            }
        );
    }

    #[test]
    fn test_connect_carries_sid() {
        let event = ChannelEvent::from_packet(SocketPacket::Connect(Some(json!({"sid": "s1"}))));
        assert_eq!(
            event,
            ChannelEvent::Connected {
                sid: Some("s1".to_string())
            }
        );
    }

    #[test]
    fn test_handshake_auth_value() {
        let auth = HandshakeAuth::bearer(&AccessToken::new("abc"));
        assert_eq!(auth.to_value(), json!({"token": "Bearer abc"}));
    }
}
