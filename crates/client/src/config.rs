//! Client configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

use supportchat_shared::BOT_SENDER_ID;
use url::Url;

use crate::auth::AccessToken;
use crate::realtime::{ConnectionSettings, ReconnectPolicy};
use crate::session::SessionSettings;

/// Recipient the conversation is started with when none is configured
pub const DEFAULT_RECIPIENT_ID: &str = "fc97e34c-faeb-412e-bca0-3563a5b2fe89";

/// Client configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Endpoints
    pub socket_url: Url,
    pub api_url: Url,

    // Credentials
    pub access_token: AccessToken,
    pub refresh_cookie: Option<String>, // e.g. "refresh_token=..."

    // Conversation
    pub recipient_id: String,
    pub bot_sender_id: String,

    // Channel
    pub reconnect_attempts: usize,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_auth_renewals: u32,

    // Timeouts
    pub request_timeout_ms: u64,
    pub typing_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let socket_url = parse_url(
            "CHAT_SOCKET_URL",
            &env::var("CHAT_SOCKET_URL").unwrap_or_else(|_| "http://localhost:3001".to_string()),
        )?;
        let api_url = match env::var("CHAT_API_URL") {
            Ok(raw) => parse_url("CHAT_API_URL", &raw)?,
            Err(_) => socket_url.clone(),
        };

        Ok(Self {
            socket_url,
            api_url,

            // Credentials
            access_token: env::var("CHAT_ACCESS_TOKEN")
                .ok()
                .filter(|token| !token.is_empty())
                .map(AccessToken::new)
                .ok_or(ConfigError::Missing("CHAT_ACCESS_TOKEN"))?,
            refresh_cookie: env::var("CHAT_REFRESH_COOKIE").ok(),

            // Conversation
            recipient_id: env::var("CHAT_RECIPIENT_ID")
                .unwrap_or_else(|_| DEFAULT_RECIPIENT_ID.to_string()),
            bot_sender_id: env::var("CHAT_BOT_SENDER_ID")
                .unwrap_or_else(|_| BOT_SENDER_ID.to_string()),

            // Channel
            reconnect_attempts: parse_var("CHAT_RECONNECT_ATTEMPTS", 5)?,
            reconnect_base_delay_ms: parse_var("CHAT_RECONNECT_BASE_DELAY_MS", 500)?,
            reconnect_max_delay_ms: parse_var("CHAT_RECONNECT_MAX_DELAY_MS", 5000)?,
            max_auth_renewals: parse_var("CHAT_MAX_AUTH_RENEWALS", 1)?,

            // Timeouts
            request_timeout_ms: parse_var("CHAT_REQUEST_TIMEOUT_MS", 30000)?,
            typing_timeout_secs: match env::var("CHAT_TYPING_TIMEOUT_SECS") {
                Ok(raw) => Some(parse_value("CHAT_TYPING_TIMEOUT_SECS", &raw)?),
                Err(_) => None,
            },
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            bot_sender_id: self.bot_sender_id.clone(),
            connection: ConnectionSettings {
                reconnect: ReconnectPolicy {
                    max_retries: self.reconnect_attempts,
                    base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
                    max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
                },
                max_auth_renewals: self.max_auth_renewals,
            },
            typing_timeout: self.typing_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        reason: format!("cannot parse {:?}", raw),
    })
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
