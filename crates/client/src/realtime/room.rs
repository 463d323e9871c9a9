//! Conversation room membership
//!
//! The channel may come up before or after bootstrap resolves the
//! conversation id. The join is sent once both are available, exactly once
//! per live channel, and again after every reconnect.

use supportchat_shared::ConversationId;

/// Tracks which conversation room the current channel belongs to
#[derive(Debug, Default)]
pub struct ConversationRoom {
    conversation_id: Option<ConversationId>,
    joined: bool,
}

impl ConversationRoom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the conversation id; returns true if it changed
    pub fn set_conversation(&mut self, conversation_id: ConversationId) -> bool {
        if self.conversation_id.as_ref() == Some(&conversation_id) {
            return false;
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            "Conversation room resolved"
        );
        self.conversation_id = Some(conversation_id);
        self.joined = false;
        true
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    /// Conversation to join now, if the channel is live and not yet joined
    pub fn pending_join(&self, channel_live: bool) -> Option<&ConversationId> {
        if !channel_live || self.joined {
            return None;
        }
        self.conversation_id.as_ref()
    }

    pub fn mark_joined(&mut self) {
        self.joined = true;
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Forget the membership of a channel that went away
    pub fn leave(&mut self) {
        if self.joined {
            tracing::debug!(
                conversation_id = ?self.conversation_id,
                "Left conversation room"
            );
        }
        self.joined = false;
    }
}
