//! Terminal support chat
//!
//! Mounts a chat session against the configured backend, prints the
//! transcript as it changes and sends every line read from stdin.
//!
//! Usage:
//!   CHAT_ACCESS_TOKEN=... cargo run --bin supportchat
//!
//! Type `/quit` (or press Ctrl+D) to leave.

use std::sync::Arc;

use anyhow::Context;
use supportchat_client::auth::HttpTokenRenewer;
use supportchat_client::bootstrap::HttpBootstrapper;
use supportchat_client::http::build_client;
use supportchat_client::realtime::WebSocketTransport;
use supportchat_client::{ChatSession, Config, SessionDeps, SessionEvent};
use supportchat_shared::Message;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so they stay out of the conversation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let client = build_client(
        &config.api_url,
        config.request_timeout(),
        config.refresh_cookie.as_deref(),
    )
    .context("Failed to build HTTP client")?;

    let deps = SessionDeps {
        transport: Arc::new(WebSocketTransport::new(&config.socket_url)?),
        renewer: Arc::new(HttpTokenRenewer::new(client.clone(), &config.api_url)?),
        bootstrapper: Arc::new(HttpBootstrapper::new(
            client,
            &config.api_url,
            config.recipient_id.clone(),
        )?),
    };

    tracing::info!(
        socket_url = %config.socket_url,
        api_url = %config.api_url,
        "Starting support chat"
    );

    let mut session = ChatSession::mount(
        config.session_settings(),
        config.access_token.clone(),
        deps,
    );
    let mut typing = session.typing();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim() == "/quit" => break,
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    // Optimistic copy is printed through MessageAppended
                    if let Err(e) = session.send(line).await {
                        tracing::debug!(error = %e, "Send not accepted");
                    }
                }
                None => break,
            },
            event = session.next_event() => match event {
                Some(SessionEvent::ConversationReady { conversation_id, history }) => {
                    println!("-- conversation {} --", conversation_id);
                    for message in &history {
                        print_message(message);
                    }
                }
                Some(SessionEvent::MessageAppended(message)) => print_message(&message),
                Some(SessionEvent::Alert(alert)) => println!("!! {}", alert),
                Some(SessionEvent::RedirectToLogin) => {
                    println!("!! Session expired, please log in again");
                    break;
                }
                Some(SessionEvent::ConnectionStateChanged(state)) => {
                    tracing::info!(state = ?state, "Connection state changed");
                }
                None => break,
            },
            changed = typing.changed() => {
                if changed.is_err() {
                    break;
                }
                if *typing.borrow_and_update() {
                    println!("   (support is typing...)");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close().await;
    Ok(())
}

fn print_message(message: &Message) {
    println!(
        "[{}] {}: {}",
        message.timestamp,
        message.sender.as_str(),
        message.text
    );
}
