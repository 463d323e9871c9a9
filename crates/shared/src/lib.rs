//! Support chat shared types
//!
//! This crate contains the message model and error taxonomy shared by the
//! chat client and its hosts.

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;
