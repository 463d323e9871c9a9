//! Transcript store
//!
//! Ordered, append-only record of the messages shown in a session.

use supportchat_shared::Message;

/// Messages in arrival order
///
/// Nothing is ever reordered, deduplicated, mutated or removed while the
/// session is mounted.
#[derive(Debug, Default)]
pub struct TranscriptStore {
    messages: Vec<Message>,
    seeded: bool,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append bootstrap history after anything already shown
    ///
    /// Only the first call has an effect; returns whether it did.
    pub fn seed(&mut self, history: Vec<Message>) -> bool {
        if self.seeded {
            tracing::warn!("Transcript already seeded, ignoring history");
            return false;
        }
        self.seeded = true;

        if !self.messages.is_empty() {
            tracing::debug!(
                shown = self.messages.len(),
                "History arrived after live messages"
            );
        }
        self.messages.extend(history);
        true
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}
