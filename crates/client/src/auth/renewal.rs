//! Access token renewal
//!
//! When the chat channel rejects the current credential the connection
//! manager asks a [`TokenRenewer`] for a fresh one. The HTTP implementation
//! posts to the token endpoint with the cookie-held refresh context.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use super::token::AccessToken;

/// Error type for token renewal
#[derive(Debug, thiserror::Error)]
pub enum RenewalError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token renewal rejected with status {0}")]
    Rejected(StatusCode),

    #[error("Invalid response from token endpoint")]
    InvalidResponse,

    #[error("Invalid token endpoint URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Source of replacement credentials
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    async fn renew(&self) -> Result<AccessToken, RenewalError>;
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
}

/// Renews the access token through `POST /api/token`
pub struct HttpTokenRenewer {
    client: Client,
    endpoint: Url,
}

impl HttpTokenRenewer {
    pub fn new(client: Client, api_url: &Url) -> Result<Self, RenewalError> {
        Ok(Self {
            client,
            endpoint: api_url.join("/api/token")?,
        })
    }
}

#[async_trait]
impl TokenRenewer for HttpTokenRenewer {
    async fn renew(&self) -> Result<AccessToken, RenewalError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(status = %status, "Token renewal rejected");
            return Err(RenewalError::Rejected(status));
        }

        // The endpoint answers with a one-element array
        let grants: Vec<TokenGrant> = response.json().await?;
        let grant = grants
            .into_iter()
            .next()
            .ok_or(RenewalError::InvalidResponse)?;

        tracing::info!("Access token renewed");
        Ok(AccessToken::new(grant.access_token))
    }
}
