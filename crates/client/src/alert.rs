//! User-facing alerts
//!
//! Blocking confirmations the host shows and the user must dismiss.

use std::fmt;

pub const BOOTSTRAP_FAILED_ALERT: &str = "Failed to find conversation, please reload the page";

pub const NO_CONVERSATION_ALERT: &str = "Failed to start the conversation, please reload the page";

pub const CONNECTION_LOST_ALERT: &str = "Lost connection to the chat server, retrying";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    BootstrapFailed,
    NoConversation,
    /// The server rejected a send
    SendFailed,
    ConnectionLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
}

impl Alert {
    pub fn bootstrap_failed() -> Self {
        Self {
            kind: AlertKind::BootstrapFailed,
            message: BOOTSTRAP_FAILED_ALERT.to_string(),
        }
    }

    pub fn no_conversation() -> Self {
        Self {
            kind: AlertKind::NoConversation,
            message: NO_CONVERSATION_ALERT.to_string(),
        }
    }

    /// Carries the server's message verbatim
    pub fn send_failed(message: impl Into<String>) -> Self {
        Self {
            kind: AlertKind::SendFailed,
            message: message.into(),
        }
    }

    pub fn connection_lost() -> Self {
        Self {
            kind: AlertKind::ConnectionLost,
            message: CONNECTION_LOST_ALERT.to_string(),
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
