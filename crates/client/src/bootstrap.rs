//! Conversation bootstrap
//!
//! Resolves the active conversation and its history once per session through
//! `POST /api/start-conversation`.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde_json::json;
use supportchat_shared::{Conversation, ConversationId, Message};
use url::Url;

use crate::auth::AccessToken;
use crate::normalizer::{MessageNormalizer, RawInbound};
use crate::typing::TypingCoordinator;

/// Error type for conversation bootstrap
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Bootstrap rejected with status {0}")]
    Status(StatusCode),

    #[error("No conversation returned")]
    Empty,

    #[error("Invalid bootstrap endpoint URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Source of the session's conversation
#[async_trait]
pub trait ConversationBootstrapper: Send + Sync {
    /// Start (or resume) the conversation; the first entry is the active one
    async fn start_conversation(
        &self,
        token: &AccessToken,
    ) -> Result<Vec<Conversation>, BootstrapError>;
}

pub struct HttpBootstrapper {
    client: Client,
    endpoint: Url,
    recipient_id: String,
}

impl HttpBootstrapper {
    pub fn new(
        client: Client,
        api_url: &Url,
        recipient_id: impl Into<String>,
    ) -> Result<Self, BootstrapError> {
        Ok(Self {
            client,
            endpoint: api_url.join("/api/start-conversation")?,
            recipient_id: recipient_id.into(),
        })
    }
}

#[async_trait]
impl ConversationBootstrapper for HttpBootstrapper {
    async fn start_conversation(
        &self,
        token: &AccessToken,
    ) -> Result<Vec<Conversation>, BootstrapError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, token.bearer())
            .json(&json!({ "recipient_id": self.recipient_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "Conversation bootstrap rejected");
            return Err(BootstrapError::Status(status));
        }

        Ok(response.json().await?)
    }
}

/// Pick the active conversation and normalize its history in order
pub fn resolve_conversation(
    conversations: Vec<Conversation>,
    normalizer: &MessageNormalizer,
    typing: &mut TypingCoordinator,
) -> Result<(ConversationId, Vec<Message>), BootstrapError> {
    let conversation = conversations
        .into_iter()
        .next()
        .ok_or(BootstrapError::Empty)?;
    let conversation_id = conversation.id;

    let history = conversation
        .messages
        .into_iter()
        .map(|entry| {
            normalizer.normalize(
                RawInbound::History {
                    record: entry.rest,
                    conversation_id: conversation_id.clone(),
                },
                Some(&conversation_id),
                typing,
            )
        })
        .collect();

    Ok((conversation_id, history))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use mockito::Matcher;
    use std::time::Duration;
    use supportchat_shared::Sender;

    fn bootstrapper_for(server: &mockito::Server) -> HttpBootstrapper {
        let api_url = Url::parse(&server.url()).unwrap();
        let client = build_client(&api_url, Duration::from_secs(5), None).unwrap();
        HttpBootstrapper::new(client, &api_url, "recipient-1").unwrap()
    }

    #[tokio::test]
    async fn test_start_conversation_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/start-conversation")
            .match_header("authorization", "Bearer t1")
            .match_body(Matcher::Json(json!({"recipient_id": "recipient-1"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"id": 17, "messages": [
                    {"rest": {"id": 1, "message": "hello", "isSender": true, "created_at": "2024-01-02T10:00:00Z"}},
                    {"rest": {"id": 2, "message": "hi, how can we help?", "isSender": false}}
                ]}]"#,
            )
            .create_async()
            .await;

        let conversations = bootstrapper_for(&server)
            .start_conversation(&AccessToken::new("t1"))
            .await
            .unwrap();
        mock.assert_async().await;

        let mut typing = TypingCoordinator::new();
        let (id, history) =
            resolve_conversation(conversations, &MessageNormalizer::default(), &mut typing)
                .unwrap();

        assert_eq!(id, ConversationId::from(17));
        let senders: Vec<_> = history.iter().map(|m| m.sender).collect();
        assert_eq!(senders, vec![Sender::User, Sender::Admin]);
        assert!(history.iter().all(|m| m.conversation_id == id));
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/start-conversation")
            .with_status(500)
            .create_async()
            .await;

        let result = bootstrapper_for(&server)
            .start_conversation(&AccessToken::new("t1"))
            .await;
        assert!(matches!(
            result,
            Err(BootstrapError::Status(StatusCode::INTERNAL_SERVER_ERROR))
        ));
    }

    #[tokio::test]
    async fn test_unparseable_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/start-conversation")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let result = bootstrapper_for(&server)
            .start_conversation(&AccessToken::new("t1"))
            .await;
        assert!(matches!(result, Err(BootstrapError::Http(_))));
    }

    #[test]
    fn test_empty_conversation_list() {
        let mut typing = TypingCoordinator::new();
        let result =
            resolve_conversation(Vec::new(), &MessageNormalizer::default(), &mut typing);
        assert!(matches!(result, Err(BootstrapError::Empty)));
    }
}
