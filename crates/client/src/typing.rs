//! Typing indicator
//!
//! A single flag: set when the user sends, cleared when a bot reply arrives.
//! Hosts observe it through a watch channel.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Owns the "waiting for a reply" flag of one session
#[derive(Debug)]
pub struct TypingCoordinator {
    tx: watch::Sender<bool>,
    expiry: Option<Duration>,
    pending_since: Option<Instant>,
}

impl TypingCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx,
            expiry: None,
            pending_since: None,
        }
    }

    /// Clear the flag automatically once it has been pending this long
    pub fn with_expiry(expiry: Option<Duration>) -> Self {
        Self {
            expiry,
            ..Self::new()
        }
    }

    pub fn is_pending(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn mark_pending(&mut self) {
        self.pending_since = Some(Instant::now());
        self.tx.send_replace(true);
    }

    pub fn clear(&mut self) {
        self.pending_since = None;
        if self.tx.send_replace(false) {
            tracing::debug!("Typing indicator cleared");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Time left before the pending flag expires, if expiry is enabled
    pub fn expire_after(&self) -> Option<Duration> {
        let expiry = self.expiry?;
        let since = self.pending_since?;
        Some(expiry.saturating_sub(since.elapsed()))
    }

    /// Clear the flag if it outlived the configured expiry; returns whether it did
    pub fn expire_if_stale(&mut self) -> bool {
        match self.expire_after() {
            Some(left) if left.is_zero() => {
                tracing::debug!("Typing indicator expired without a reply");
                self.clear();
                true
            }
            _ => false,
        }
    }
}

impl Default for TypingCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
