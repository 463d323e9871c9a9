//! Session credential handling

pub mod renewal;
pub mod token;

pub use renewal::{HttpTokenRenewer, RenewalError, TokenRenewer};
pub use token::AccessToken;
