//! Send pipeline
//!
//! User-authored messages are appended to the transcript before they are
//! transmitted. The acknowledgement is awaited separately and only matters
//! when the server reports an error.

use chrono::Utc;
use serde_json::Value;
use supportchat_shared::{AckResponse, ChatError, ChatResult, ConversationId, Message, MessageId};
use tokio::sync::oneshot;

use crate::normalizer::MessageNormalizer;
use crate::realtime::events::SEND_MESSAGE;
use crate::transcript::TranscriptStore;
use crate::typing::TypingCoordinator;

/// Anything that can emit an event and hand back its acknowledgement
pub trait Outbound {
    fn emit_with_ack(&mut self, event: &str, payload: Value) -> oneshot::Receiver<AckResponse>;
}

/// How a send ended, as far as the server told us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Server answered with `status: "error"`
    Rejected(String),
    /// Channel went away before an acknowledgement arrived
    Unacknowledged,
}

/// A send that has been appended and handed to the channel
#[derive(Debug)]
pub struct PendingSend {
    pub message: Message,
    ack: oneshot::Receiver<AckResponse>,
}

impl PendingSend {
    pub fn id(&self) -> &MessageId {
        &self.message.id
    }

    /// Wait for the acknowledgement
    pub async fn wait(self) -> (MessageId, SendOutcome) {
        let outcome = match self.ack.await {
            Ok(ack) if ack.is_error() => SendOutcome::Rejected(ack.message),
            Ok(_) => SendOutcome::Delivered,
            Err(_) => SendOutcome::Unacknowledged,
        };
        (self.message.id, outcome)
    }
}

/// Builds optimistic records and transmits them
#[derive(Debug, Default)]
pub struct SendPipeline {
    last_id: i64,
}

impl SendPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch milliseconds, bumped so ids never repeat within a session
    fn next_id(&mut self) -> MessageId {
        let id = Utc::now().timestamp_millis().max(self.last_id + 1);
        self.last_id = id;
        MessageId::from(id)
    }

    /// Append the message optimistically, mark typing, then emit it
    ///
    /// Fails with [`ChatError::NoConversation`] without touching the
    /// transcript when no conversation has been resolved.
    pub fn send<O: Outbound + ?Sized>(
        &mut self,
        text: &str,
        conversation_id: Option<&ConversationId>,
        normalizer: &MessageNormalizer,
        transcript: &mut TranscriptStore,
        typing: &mut TypingCoordinator,
        outbound: &mut O,
    ) -> ChatResult<PendingSend> {
        let conversation_id = match conversation_id {
            Some(id) if !id.is_placeholder() => id.clone(),
            _ => {
                tracing::warn!("Send attempted before a conversation was resolved");
                return Err(ChatError::NoConversation);
            }
        };

        let message = normalizer.outgoing(self.next_id(), text, conversation_id);
        let payload =
            serde_json::to_value(&message).map_err(|e| ChatError::Send(e.to_string()))?;

        transcript.append(message.clone());
        typing.mark_pending();

        let ack = outbound.emit_with_ack(SEND_MESSAGE, payload);
        tracing::debug!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            "Message sent"
        );

        Ok(PendingSend { message, ack })
    }
}
