//! Support chat client
//!
//! Real-time synchronization engine behind a customer-support chat view:
//! conversation bootstrap, a Socket.IO channel with credential renewal,
//! message normalization, the ordered transcript, optimistic sends and the
//! typing indicator.

pub mod alert;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod http;
pub mod normalizer;
pub mod realtime;
pub mod send;
pub mod session;
pub mod transcript;
pub mod typing;

pub use alert::{Alert, AlertKind};
pub use config::{Config, ConfigError};
pub use session::{ChatSession, SessionDeps, SessionEvent, SessionSettings};
