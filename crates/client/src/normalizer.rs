//! Message normalization
//!
//! Turns the raw shapes the backend produces (live pushes and history records)
//! into canonical [`Message`] records.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde_json::Value;
use supportchat_shared::{
    ConversationId, HistoricalRecord, Message, MessageId, Sender, BOT_SENDER_ID,
};

use crate::realtime::PushFrame;
use crate::typing::TypingCoordinator;

/// Display format of message timestamps
const TIME_FORMAT: &str = "%H:%M";

/// Raw inbound record, tagged by where it came from
#[derive(Debug, Clone)]
pub enum RawInbound {
    /// `receiveMessage` push from the channel
    Push(PushFrame),
    /// Record from the bootstrap history
    History {
        record: HistoricalRecord,
        conversation_id: ConversationId,
    },
}

/// Builds canonical messages and derives their sender
#[derive(Debug, Clone)]
pub struct MessageNormalizer {
    bot_sender_id: String,
}

impl MessageNormalizer {
    pub fn new(bot_sender_id: impl Into<String>) -> Self {
        Self {
            bot_sender_id: bot_sender_id.into(),
        }
    }

    /// Normalize one raw record
    ///
    /// A bot-authored message clears the typing indicator.
    pub fn normalize(
        &self,
        raw: RawInbound,
        known_conversation_id: Option<&ConversationId>,
        typing: &mut TypingCoordinator,
    ) -> Message {
        let message = match raw {
            RawInbound::Push(frame) => {
                let conversation_id = frame
                    .conversation_id
                    .filter(|id| !id.is_placeholder())
                    .or_else(|| known_conversation_id.cloned())
                    .unwrap_or_else(ConversationId::placeholder);

                Message {
                    id: frame.id,
                    text: body(frame.message, frame.text),
                    sender: self.resolve_sender(frame.sender_id.as_deref(), true),
                    timestamp: display_timestamp(frame.created_at.as_ref()),
                    conversation_id,
                }
            }
            RawInbound::History {
                record,
                conversation_id,
            } => Message {
                id: record.id,
                text: record.message,
                sender: self.resolve_sender(record.sender_id.as_deref(), !record.is_sender),
                timestamp: display_timestamp(record.created_at.as_ref()),
                conversation_id,
            },
        };

        if message.sender == Sender::Bot {
            typing.clear();
        }
        message
    }

    /// Bot sentinel wins; otherwise the other party is the admin
    pub fn resolve_sender(&self, sender_id: Option<&str>, from_other_party: bool) -> Sender {
        if sender_id == Some(self.bot_sender_id.as_str()) {
            Sender::Bot
        } else if from_other_party {
            Sender::Admin
        } else {
            Sender::User
        }
    }

    /// Optimistic record for a message the user just typed
    pub fn outgoing(
        &self,
        id: MessageId,
        text: impl Into<String>,
        conversation_id: ConversationId,
    ) -> Message {
        Message {
            id,
            text: text.into(),
            sender: Sender::User,
            timestamp: format_time(&Local::now()),
            conversation_id,
        }
    }
}

impl Default for MessageNormalizer {
    fn default() -> Self {
        Self::new(BOT_SENDER_ID)
    }
}

fn body(message: Option<String>, text: Option<String>) -> String {
    match message {
        Some(message) if !message.is_empty() => message,
        _ => text.unwrap_or_default(),
    }
}

/// Format an instant as local wall-clock time
pub fn format_time<Tz: TimeZone>(at: &DateTime<Tz>) -> String {
    at.with_timezone(&Local).format(TIME_FORMAT).to_string()
}

/// Display timestamp for a raw `created_at`, falling back to now
pub fn display_timestamp(created_at: Option<&Value>) -> String {
    let parsed = created_at.and_then(parse_created_at);
    if parsed.is_none() && created_at.is_some_and(|v| !v.is_null()) {
        tracing::debug!(created_at = ?created_at, "Unparseable created_at, using current time");
    }
    format_time(&parsed.unwrap_or_else(Local::now))
}

fn parse_created_at(raw: &Value) -> Option<DateTime<Local>> {
    match raw {
        Value::String(s) => parse_timestamp(s.trim()),
        Value::Number(n) => n.as_i64().and_then(from_epoch_millis),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Local));
    }
    // Postgres text form, e.g. `2024-01-02 15:04:05.123+00`
    if let Ok(at) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(at.with_timezone(&Local));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Local.from_local_datetime(&naive).earliest();
        }
    }
    raw.parse::<i64>().ok().and_then(from_epoch_millis)
}

fn from_epoch_millis(millis: i64) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt(millis).single()
}
