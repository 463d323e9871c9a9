//! End-to-end session behaviour over the in-memory transport

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use supportchat_client::auth::{AccessToken, RenewalError, TokenRenewer};
use supportchat_client::bootstrap::{BootstrapError, ConversationBootstrapper};
use supportchat_client::realtime::events::SEND_MESSAGE;
use supportchat_client::realtime::{
    ConnectionSettings, ConnectionState, MemoryListener, MemoryPeer, MemoryTransport,
    ReconnectPolicy,
};
use supportchat_client::{AlertKind, ChatSession, SessionDeps, SessionEvent, SessionSettings};
use supportchat_shared::{
    AckResponse, ChatError, Conversation, ConversationId, Sender, BOT_SENDER_ID,
};
use tokio::sync::Notify;

// =============================================================================
// Test doubles
// =============================================================================

struct StubRenewer {
    responses: Mutex<VecDeque<Result<&'static str, StatusCode>>>,
}

#[async_trait]
impl TokenRenewer for StubRenewer {
    async fn renew(&self) -> Result<AccessToken, RenewalError> {
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(token)) => Ok(AccessToken::new(token)),
            Some(Err(status)) => Err(RenewalError::Rejected(status)),
            None => Err(RenewalError::InvalidResponse),
        }
    }
}

/// Holds every renewal until the test opens the gate
struct GatedRenewer {
    gate: Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl TokenRenewer for GatedRenewer {
    async fn renew(&self) -> Result<AccessToken, RenewalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(AccessToken::new("fresh"))
    }
}

struct StubBootstrapper {
    conversations: serde_json::Value,
    tokens: Mutex<Vec<String>>,
}

#[async_trait]
impl ConversationBootstrapper for StubBootstrapper {
    async fn start_conversation(
        &self,
        token: &AccessToken,
    ) -> Result<Vec<Conversation>, BootstrapError> {
        self.tokens.lock().unwrap().push(token.bearer());
        Ok(serde_json::from_value(self.conversations.clone()).unwrap())
    }
}

fn conversation_with_history() -> serde_json::Value {
    json!([{
        "id": 17,
        "messages": [
            {"rest": {"id": 1, "message": "My order never arrived", "isSender": true}},
            {"rest": {"id": 2, "message": "Sorry to hear that", "isSender": false}}
        ]
    }])
}

struct Harness {
    session: ChatSession,
    listener: MemoryListener,
    bootstrapper: Arc<StubBootstrapper>,
}

fn mount(
    conversations: serde_json::Value,
    renewals: Vec<Result<&'static str, StatusCode>>,
) -> Harness {
    let renewer = Arc::new(StubRenewer {
        responses: Mutex::new(renewals.into()),
    });
    mount_with(conversations, renewer)
}

fn mount_with(conversations: serde_json::Value, renewer: Arc<dyn TokenRenewer>) -> Harness {
    let (transport, listener) = MemoryTransport::new();
    let bootstrapper = Arc::new(StubBootstrapper {
        conversations,
        tokens: Mutex::new(Vec::new()),
    });
    let deps = SessionDeps {
        transport: Arc::new(transport),
        renewer,
        bootstrapper: bootstrapper.clone(),
    };
    let settings = SessionSettings {
        connection: ConnectionSettings {
            reconnect: ReconnectPolicy {
                max_retries: 1,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
            max_auth_renewals: 1,
        },
        ..SessionSettings::default()
    };

    Harness {
        session: ChatSession::mount(settings, AccessToken::new("initial"), deps),
        listener,
        bootstrapper,
    }
}

async fn wait_for(
    session: &mut ChatSession,
    mut matches: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match session.next_event().await {
                Some(event) if matches(&event) => return event,
                Some(_) => continue,
                None => panic!("Session ended while waiting for an event"),
            }
        }
    })
    .await
    .unwrap()
}

async fn wait_ready(session: &mut ChatSession) {
    wait_for(session, |e| matches!(e, SessionEvent::ConversationReady { .. })).await;
}

async fn wait_state(session: &mut ChatSession, state: ConnectionState) {
    wait_for(session, |e| *e == SessionEvent::ConnectionStateChanged(state)).await;
}

/// Accept the channel once bootstrap is done, so the join goes out on connect
async fn connect_after_ready(harness: &mut Harness) -> MemoryPeer {
    let mut peer = harness.listener.accept().await.unwrap();
    wait_ready(&mut harness.session).await;
    peer.accept_handshake();
    wait_state(&mut harness.session, ConnectionState::Connected).await;

    let join = peer.next_emit().await.unwrap();
    assert_eq!(join.name, "joinConversation_17");
    peer
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_bootstrap_seeds_history_in_order() {
    let mut harness = mount(conversation_with_history(), vec![]);

    match wait_for(&mut harness.session, |e| {
        matches!(e, SessionEvent::ConversationReady { .. })
    })
    .await
    {
        SessionEvent::ConversationReady {
            conversation_id,
            history,
        } => {
            assert_eq!(conversation_id, ConversationId::from(17));
            assert_eq!(history.len(), 2);
        }
        other => panic!("Unexpected event {:?}", other),
    }

    let snapshot = harness.session.snapshot().await.unwrap();
    let senders: Vec<_> = snapshot.iter().map(|m| m.sender).collect();
    assert_eq!(senders, vec![Sender::User, Sender::Admin]);
    assert_eq!(
        harness.bootstrapper.tokens.lock().unwrap().as_slice(),
        ["Bearer initial".to_string()]
    );
}

#[tokio::test]
async fn test_inbound_messages_append_in_arrival_order() {
    let mut harness = mount(conversation_with_history(), vec![]);
    let peer = connect_after_ready(&mut harness).await;

    peer.deliver(json!({"id": 30, "message": "third", "sender_id": "agent-1"}));
    peer.deliver(json!({"id": 10, "text": "fourth", "sender_id": BOT_SENDER_ID}));

    for _ in 0..2 {
        wait_for(&mut harness.session, |e| {
            matches!(e, SessionEvent::MessageAppended(_))
        })
        .await;
    }

    let snapshot = harness.session.snapshot().await.unwrap();
    let texts: Vec<_> = snapshot.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["My order never arrived", "Sorry to hear that", "third", "fourth"]
    );
    assert_eq!(snapshot[3].sender, Sender::Bot);
}

#[tokio::test]
async fn test_send_without_conversation_alerts() {
    let mut harness = mount(json!([]), vec![]);

    let alert = wait_for(&mut harness.session, |e| matches!(e, SessionEvent::Alert(_))).await;
    assert!(matches!(
        alert,
        SessionEvent::Alert(ref a) if a.kind == AlertKind::BootstrapFailed
    ));

    let result = harness.session.send("hello?").await;
    assert!(matches!(result, Err(ChatError::NoConversation)));

    let alert = wait_for(&mut harness.session, |e| matches!(e, SessionEvent::Alert(_))).await;
    match alert {
        SessionEvent::Alert(alert) => {
            assert_eq!(alert.kind, AlertKind::NoConversation);
            assert_eq!(
                alert.message,
                "Failed to start the conversation, please reload the page"
            );
        }
        other => panic!("Unexpected event {:?}", other),
    }

    assert!(harness.session.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_send_is_visible_before_ack() {
    let mut harness = mount(conversation_with_history(), vec![]);
    let mut peer = connect_after_ready(&mut harness).await;

    let sent = harness.session.send("Any update?").await.unwrap();
    assert_eq!(sent.sender, Sender::User);
    assert!(harness.session.is_typing());

    let emit = peer.next_emit().await.unwrap();
    assert_eq!(emit.name, SEND_MESSAGE);
    assert_eq!(emit.args[0]["text"], json!("Any update?"));

    // No acknowledgement yet
    let snapshot = harness.session.snapshot().await.unwrap();
    assert_eq!(snapshot.last(), Some(&sent));

    peer.acknowledge(
        emit.ack.unwrap(),
        &AckResponse {
            status: "error".to_string(),
            message: "Conversation is closed".to_string(),
        },
    );

    match wait_for(&mut harness.session, |e| matches!(e, SessionEvent::Alert(_))).await {
        SessionEvent::Alert(alert) => {
            assert_eq!(alert.kind, AlertKind::SendFailed);
            assert_eq!(alert.message, "Conversation is closed");
        }
        other => panic!("Unexpected event {:?}", other),
    }

    // The optimistic record stays
    assert_eq!(harness.session.snapshot().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_bot_reply_clears_typing() {
    let mut harness = mount(conversation_with_history(), vec![]);
    let mut peer = connect_after_ready(&mut harness).await;
    let mut typing = harness.session.typing();

    harness.session.send("Hello").await.unwrap();
    peer.next_emit().await.unwrap();
    assert!(*typing.borrow_and_update());

    peer.deliver(json!({"id": 50, "message": "An agent will be with you", "sender_id": "agent-1"}));
    wait_for(&mut harness.session, |e| matches!(e, SessionEvent::MessageAppended(_))).await;
    assert!(harness.session.is_typing());

    peer.deliver(json!({"id": 51, "message": "Auto reply", "sender_id": BOT_SENDER_ID}));
    wait_for(&mut harness.session, |e| matches!(e, SessionEvent::MessageAppended(_))).await;

    tokio::time::timeout(Duration::from_secs(2), typing.changed())
        .await
        .unwrap()
        .unwrap();
    assert!(!*typing.borrow());
}

#[tokio::test]
async fn test_auth_failure_reconnects_with_renewed_token() {
    let mut harness = mount(conversation_with_history(), vec![Ok("fresh")]);

    let first = harness.listener.accept().await.unwrap();
    assert_eq!(first.auth().token, "Bearer initial");
    wait_ready(&mut harness.session).await;

    first.reject_handshake("jwt expired");

    let mut second = harness.listener.accept().await.unwrap();
    assert_eq!(second.auth().token, "Bearer fresh");
    assert!(first.is_closed());

    second.accept_handshake();
    wait_state(&mut harness.session, ConnectionState::Connected).await;
    assert_eq!(second.next_emit().await.unwrap().name, "joinConversation_17");

    assert_eq!(harness.session.token().await.unwrap().as_str(), "fresh");
}

#[tokio::test]
async fn test_failed_renewal_redirects_and_stops_appending() {
    let mut harness = mount(
        conversation_with_history(),
        vec![Err(StatusCode::UNAUTHORIZED)],
    );

    let peer = harness.listener.accept().await.unwrap();
    wait_ready(&mut harness.session).await;
    peer.reject_handshake("jwt expired");

    wait_for(&mut harness.session, |e| *e == SessionEvent::RedirectToLogin).await;
    wait_state(&mut harness.session, ConnectionState::Terminated).await;

    assert!(peer.is_closed());
    assert!(!peer.deliver(json!({"id": 99, "message": "late"})));

    let result = harness.session.send("still there?").await;
    assert!(matches!(result, Err(ChatError::Auth(_))));
    assert_eq!(harness.session.snapshot().await.unwrap().len(), 2);
    assert!(harness.listener.try_accept().is_none());
}

#[tokio::test]
async fn test_close_twice_is_harmless() {
    let mut harness = mount(conversation_with_history(), vec![]);
    let peer = connect_after_ready(&mut harness).await;

    harness.session.close().await;
    harness.session.close().await;

    assert!(peer.is_closed());
    assert!(!peer.deliver(json!({"id": 5, "message": "after close"})));

    // Drain whatever was published before the task stopped
    while let Some(event) = harness.session.next_event().await {
        assert!(!matches!(event, SessionEvent::MessageAppended(_)));
    }
    assert!(matches!(
        harness.session.send("hi").await,
        Err(ChatError::Closed)
    ));
}

#[tokio::test]
async fn test_send_during_renewal_is_buffered_until_reconnect() {
    let renewer = Arc::new(GatedRenewer {
        gate: Notify::new(),
        calls: AtomicUsize::new(0),
    });
    let mut harness = mount_with(conversation_with_history(), renewer.clone());

    let first = harness.listener.accept().await.unwrap();
    wait_ready(&mut harness.session).await;
    first.reject_handshake("jwt expired");
    wait_state(&mut harness.session, ConnectionState::AuthRecovering).await;

    // The session keeps serving while the renewal is outstanding
    let sent = tokio::time::timeout(Duration::from_millis(500), harness.session.send("hello"))
        .await
        .unwrap()
        .unwrap();
    let snapshot = tokio::time::timeout(Duration::from_millis(500), harness.session.snapshot())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.last(), Some(&sent));
    assert_eq!(renewer.calls.load(Ordering::SeqCst), 1);

    renewer.gate.notify_one();

    let mut second = harness.listener.accept().await.unwrap();
    assert_eq!(second.auth().token, "Bearer fresh");
    second.accept_handshake();
    wait_state(&mut harness.session, ConnectionState::Connected).await;

    assert_eq!(second.next_emit().await.unwrap().name, "joinConversation_17");
    let emit = second.next_emit().await.unwrap();
    assert_eq!(emit.name, SEND_MESSAGE);
    assert_eq!(emit.args[0]["text"], json!("hello"));
}

#[tokio::test]
async fn test_close_during_renewal_returns_promptly() {
    let renewer = Arc::new(GatedRenewer {
        gate: Notify::new(),
        calls: AtomicUsize::new(0),
    });
    let mut harness = mount_with(conversation_with_history(), renewer.clone());

    let first = harness.listener.accept().await.unwrap();
    wait_ready(&mut harness.session).await;
    first.reject_handshake("jwt expired");
    wait_state(&mut harness.session, ConnectionState::AuthRecovering).await;

    tokio::time::timeout(Duration::from_millis(500), harness.session.close())
        .await
        .unwrap();

    // Releasing the renewal afterwards opens nothing
    renewer.gate.notify_one();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(harness.listener.try_accept().is_none());
    assert!(matches!(
        harness.session.send("hi").await,
        Err(ChatError::Closed)
    ));
}
