//! Error types for the support chat client

use thiserror::Error;

/// User-facing failure taxonomy
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Conversation bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("No conversation has been resolved")]
    NoConversation,

    #[error("Session is closed")]
    Closed,
}

pub type ChatResult<T> = Result<T, ChatError>;
