//! Chat session
//!
//! One mounted chat view. A single task owns the transcript, the typing
//! indicator, the send pipeline and the connection manager, and handles user
//! commands, channel events, the bootstrap result and send acknowledgements
//! one at a time. [`ChatSession`] is the host's handle to that task.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use supportchat_shared::{ChatError, ChatResult, Conversation, ConversationId, Message, MessageId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::alert::Alert;
use crate::auth::{AccessToken, TokenRenewer};
use crate::bootstrap::{resolve_conversation, BootstrapError, ConversationBootstrapper};
use crate::normalizer::{MessageNormalizer, RawInbound};
use crate::realtime::{
    ConnectionEvent, ConnectionManager, ConnectionSettings, ConnectionState, Transport,
};
use crate::send::{SendOutcome, SendPipeline};
use crate::transcript::TranscriptStore;
use crate::typing::TypingCoordinator;

/// Notifications for the host
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Bootstrap resolved the conversation; `history` was appended to the
    /// transcript
    ConversationReady {
        conversation_id: ConversationId,
        history: Vec<Message>,
    },
    /// A live message (inbound or optimistic send) was appended
    MessageAppended(Message),
    /// Blocking confirmation the user must dismiss
    Alert(Alert),
    /// The credential could not be renewed; re-authenticate
    RedirectToLogin,
    ConnectionStateChanged(ConnectionState),
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub bot_sender_id: String,
    pub connection: ConnectionSettings,
    /// Clear the typing indicator after this long without a bot reply
    pub typing_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            bot_sender_id: supportchat_shared::BOT_SENDER_ID.to_string(),
            connection: ConnectionSettings::default(),
            typing_timeout: None,
        }
    }
}

/// Collaborators a session talks to
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn Transport>,
    pub renewer: Arc<dyn TokenRenewer>,
    pub bootstrapper: Arc<dyn ConversationBootstrapper>,
}

enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<ChatResult<Message>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Message>>,
    },
    Token {
        reply: oneshot::Sender<AccessToken>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a mounted chat session
///
/// Dropping the handle stops the session task and closes the channel.
pub struct ChatSession {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    typing: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Mount a session: open the channel and bootstrap the conversation
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(settings: SessionSettings, token: AccessToken, deps: SessionDeps) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let typing = TypingCoordinator::with_expiry(settings.typing_timeout);
        let typing_rx = typing.subscribe();

        let runner = SessionRunner {
            connection: ConnectionManager::new(
                deps.transport,
                deps.renewer,
                token,
                settings.connection,
            ),
            transcript: TranscriptStore::new(),
            typing,
            normalizer: MessageNormalizer::new(settings.bot_sender_id),
            pipeline: SendPipeline::new(),
            events: event_tx,
            conversation_id: None,
            last_state: ConnectionState::Disconnected,
            expired: false,
        };
        let task = tokio::spawn(runner.run(command_rx, deps.bootstrapper));

        Self {
            commands: command_tx,
            events: event_rx,
            typing: typing_rx,
            task: Some(task),
        }
    }

    /// Send a user message
    ///
    /// Resolves once the message has been appended and handed to the
    /// channel, without waiting for the server's acknowledgement.
    pub async fn send(&self, text: impl Into<String>) -> ChatResult<Message> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send {
            text: text.into(),
            reply,
        })?;
        rx.await.map_err(|_| ChatError::Closed)?
    }

    /// Current transcript in arrival order
    pub async fn snapshot(&self) -> ChatResult<Vec<Message>> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Snapshot { reply })?;
        rx.await.map_err(|_| ChatError::Closed)
    }

    /// Credential currently held by the connection
    pub async fn token(&self) -> ChatResult<AccessToken> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Token { reply })?;
        rx.await.map_err(|_| ChatError::Closed)
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Typing indicator updates
    pub fn typing(&self) -> watch::Receiver<bool> {
        self.typing.clone()
    }

    pub fn is_typing(&self) -> bool {
        *self.typing.borrow()
    }

    /// Close the channel and stop the session; safe to call more than once
    pub async fn close(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        let (reply, rx) = oneshot::channel();
        if self.command(Command::Close { reply }).is_ok() {
            let _ = rx.await;
        }
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                tracing::error!(error = %e, "Chat session task failed");
            }
        }
    }

    fn command(&self, command: Command) -> ChatResult<()> {
        self.commands.send(command).map_err(|_| ChatError::Closed)
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// Session task
// =============================================================================

type BootstrapResult = Result<Vec<Conversation>, BootstrapError>;

/// Aborts the wrapped task when dropped
struct TaskGuard<T>(JoinHandle<T>);

impl<T> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct SessionRunner {
    connection: ConnectionManager,
    transcript: TranscriptStore,
    typing: TypingCoordinator,
    normalizer: MessageNormalizer,
    pipeline: SendPipeline,
    events: mpsc::UnboundedSender<SessionEvent>,
    conversation_id: Option<ConversationId>,
    last_state: ConnectionState,
    expired: bool,
}

impl SessionRunner {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        bootstrapper: Arc<dyn ConversationBootstrapper>,
    ) {
        // Bootstrap runs alongside the channel handshake
        let token = self.connection.token().clone();
        let mut bootstrap = TaskGuard(tokio::spawn(async move {
            bootstrapper.start_conversation(&token).await
        }));
        let mut bootstrap_done = false;

        if let Err(e) = self.connection.open() {
            tracing::error!(error = %e, "Chat channel unavailable");
            self.emit(SessionEvent::Alert(Alert::connection_lost()));
        }
        self.publish_state();

        let mut acks: FuturesUnordered<BoxFuture<'static, (MessageId, SendOutcome)>> =
            FuturesUnordered::new();

        loop {
            let typing_deadline = self.typing.expire_after();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => {
                        if let Some(ack) = self.handle_command(command) {
                            acks.push(ack);
                        }
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                incoming = self.connection.recv() => {
                    if let Some(event) = self.connection.handle(incoming) {
                        self.on_connection_event(event);
                    }
                    self.publish_state();
                }
                result = &mut bootstrap.0, if !bootstrap_done => {
                    bootstrap_done = true;
                    let result = result.unwrap_or_else(|e| {
                        tracing::error!(error = %e, "Bootstrap task failed");
                        Ok(Vec::new())
                    });
                    self.on_bootstrap(result);
                }
                Some((id, outcome)) = acks.next(), if !acks.is_empty() => {
                    self.on_ack(id, outcome);
                }
                _ = tokio::time::sleep(typing_deadline.unwrap_or_default()), if typing_deadline.is_some() => {
                    self.typing.expire_if_stale();
                }
            }
        }

        tracing::debug!("Chat session stopped");
    }

    fn handle_command(
        &mut self,
        command: Command,
    ) -> Option<BoxFuture<'static, (MessageId, SendOutcome)>> {
        match command {
            Command::Send { text, reply } => {
                let (result, ack) = self.send(&text);
                let _ = reply.send(result);
                ack
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.transcript.snapshot());
                None
            }
            Command::Token { reply } => {
                let _ = reply.send(self.connection.token().clone());
                None
            }
            // Handled by the loop
            Command::Close { reply } => {
                let _ = reply.send(());
                None
            }
        }
    }

    fn send(
        &mut self,
        text: &str,
    ) -> (
        ChatResult<Message>,
        Option<BoxFuture<'static, (MessageId, SendOutcome)>>,
    ) {
        if self.expired {
            return (Err(ChatError::Auth("session expired".to_string())), None);
        }

        let result = self.pipeline.send(
            text,
            self.conversation_id.as_ref(),
            &self.normalizer,
            &mut self.transcript,
            &mut self.typing,
            &mut self.connection,
        );

        match result {
            Ok(pending) => {
                let message = pending.message.clone();
                self.emit(SessionEvent::MessageAppended(message.clone()));
                (Ok(message), Some(pending.wait().boxed()))
            }
            Err(e) => {
                if matches!(e, ChatError::NoConversation) {
                    self.emit(SessionEvent::Alert(Alert::no_conversation()));
                }
                (Err(e), None)
            }
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {}
            ConnectionEvent::Inbound(frame) => {
                let message = self.normalizer.normalize(
                    RawInbound::Push(frame),
                    self.conversation_id.as_ref(),
                    &mut self.typing,
                );
                tracing::debug!(
                    message_id = %message.id,
                    sender = message.sender.as_str(),
                    "Message received"
                );
                self.transcript.append(message.clone());
                self.emit(SessionEvent::MessageAppended(message));
            }
            ConnectionEvent::CredentialRenewed => {
                tracing::info!("Chat channel reopened with renewed credential");
            }
            ConnectionEvent::SessionExpired => {
                self.expired = true;
                self.typing.clear();
                self.emit(SessionEvent::RedirectToLogin);
            }
            ConnectionEvent::ConnectionLost => {
                self.emit(SessionEvent::Alert(Alert::connection_lost()));
            }
        }
    }

    fn on_bootstrap(&mut self, result: BootstrapResult) {
        if self.expired {
            return;
        }

        let resolved = result.and_then(|conversations| {
            resolve_conversation(conversations, &self.normalizer, &mut self.typing)
        });

        match resolved {
            Ok((conversation_id, history)) => {
                tracing::info!(
                    conversation_id = %conversation_id,
                    history = history.len(),
                    "Conversation resolved"
                );
                self.transcript.seed(history.clone());
                self.conversation_id = Some(conversation_id.clone());
                self.connection.set_conversation(conversation_id.clone());
                self.emit(SessionEvent::ConversationReady {
                    conversation_id,
                    history,
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Conversation bootstrap failed");
                self.emit(SessionEvent::Alert(Alert::bootstrap_failed()));
            }
        }
    }

    fn on_ack(&mut self, id: MessageId, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Delivered => {
                tracing::debug!(message_id = %id, "Message acknowledged");
            }
            SendOutcome::Rejected(message) => {
                tracing::warn!(message_id = %id, reason = %message, "Server rejected message");
                let message = if message.is_empty() {
                    "Failed to send message".to_string()
                } else {
                    message
                };
                self.emit(SessionEvent::Alert(Alert::send_failed(message)));
            }
            SendOutcome::Unacknowledged => {
                tracing::debug!(message_id = %id, "Message was never acknowledged");
            }
        }
    }

    fn publish_state(&mut self) {
        let state = self.connection.state();
        if state != self.last_state {
            self.last_state = state;
            self.emit(SessionEvent::ConnectionStateChanged(state));
        }
    }

    fn shutdown(&mut self) {
        self.connection.close();
        self.publish_state();
    }

    fn emit(&self, event: SessionEvent) {
        // Host may have stopped listening
        let _ = self.events.send(event);
    }
}
