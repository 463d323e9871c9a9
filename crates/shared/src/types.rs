//! Common types used across the support chat client

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Sender id the backend uses for automated (bot) replies
pub const BOT_SENDER_ID: &str = "00000000-0000-0000-0000-000000000000";

// =============================================================================
// ID Wrappers
// =============================================================================

/// Message ID - server-assigned for inbound messages, a millisecond
/// timestamp for optimistic sends
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(i64),
    Text(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{}", n),
            MessageId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        MessageId::Number(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        MessageId::Text(id.to_string())
    }
}

/// Conversation ID wrapper
///
/// The backend sends numeric ids in some payloads and strings in others; both
/// are held as their string form. An empty value is the placeholder used
/// before bootstrap has resolved a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The placeholder carried by records created before bootstrap completes
    pub fn placeholder() -> Self {
        Self(String::new())
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for ConversationId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for ConversationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => ConversationId::from(n),
            Raw::Text(s) => ConversationId(s),
        })
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Who authored a message, derived during normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Admin,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Admin => "admin",
            Sender::Bot => "bot",
        }
    }
}

/// Canonical message record held in the transcript
///
/// This is also the payload of the outbound `sendMessage` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub sender: Sender,
    /// Display-formatted local time (`HH:MM`), fixed at creation
    pub timestamp: String,
    pub conversation_id: ConversationId,
}

// =============================================================================
// Conversation bootstrap
// =============================================================================

/// Conversation returned by the bootstrap endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub messages: Vec<HistoricalMessage>,
}

/// Wrapper the backend puts around each historical record
#[derive(Debug, Clone, Deserialize)]
pub struct HistoricalMessage {
    pub rest: HistoricalRecord,
}

/// Historical message as stored by the backend
#[derive(Debug, Clone, Deserialize)]
pub struct HistoricalRecord {
    pub id: MessageId,
    #[serde(default)]
    pub message: String,
    /// True when the requesting user authored the message
    #[serde(rename = "isSender", default)]
    pub is_sender: bool,
    #[serde(default)]
    pub created_at: Option<serde_json::Value>,
    #[serde(default)]
    pub sender_id: Option<String>,
}

// =============================================================================
// Acknowledgements
// =============================================================================

/// Acknowledgement the server returns for an outbound send
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

impl AckResponse {
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_accepts_numbers_and_strings() {
        let id: MessageId = serde_json::from_str("1712345678901").unwrap();
        assert_eq!(id, MessageId::Number(1712345678901));

        let id: MessageId = serde_json::from_str(r#""msg-42""#).unwrap();
        assert_eq!(id, MessageId::Text("msg-42".to_string()));
        assert_eq!(id.to_string(), "msg-42");
    }

    #[test]
    fn test_conversation_id_from_number() {
        let id: ConversationId = serde_json::from_str("17").unwrap();
        assert_eq!(id.as_str(), "17");

        let id: ConversationId = serde_json::from_str(r#""17""#).unwrap();
        assert_eq!(id, ConversationId::from(17));
    }

    #[test]
    fn test_placeholder_conversation_id() {
        assert!(ConversationId::placeholder().is_placeholder());
        assert!(!ConversationId::from("abc").is_placeholder());
    }

    #[test]
    fn test_message_wire_shape() {
        let message = Message {
            id: MessageId::Number(1),
            text: "hello".to_string(),
            sender: Sender::User,
            timestamp: "09:15".to_string(),
            conversation_id: ConversationId::from(5),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["sender"], "user");
        assert_eq!(json["conversation_id"], "5");
    }

    #[test]
    fn test_conversation_deserialization() {
        let json = r#"{
            "id": 3,
            "messages": [
                {"rest": {"id": 10, "message": "hi", "isSender": true, "created_at": "2024-05-01T10:00:00Z"}},
                {"rest": {"id": 11, "message": "hello", "isSender": false}}
            ]
        }"#;

        let conversation: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conversation.id.as_str(), "3");
        assert_eq!(conversation.messages.len(), 2);
        assert!(conversation.messages[0].rest.is_sender);
        assert!(!conversation.messages[1].rest.is_sender);
        assert!(conversation.messages[1].rest.created_at.is_none());
    }

    #[test]
    fn test_ack_response_status() {
        let ack: AckResponse =
            serde_json::from_str(r#"{"status":"error","message":"Conversation closed"}"#).unwrap();
        assert!(ack.is_error());

        let ack: AckResponse = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert!(!ack.is_error());
        assert!(ack.message.is_empty());
    }
}
