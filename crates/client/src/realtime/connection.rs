//! Chat channel connection management
//!
//! Owns the lifecycle of the realtime channel: open, authenticate, join the
//! conversation room, renew the credential when the server rejects it, and
//! reconnect after transport loss.
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!      ^  |          ^  ^          |  \
//!      |  +----------+  |  (auth rejected)  (transport lost)
//!      |  (retrying)    +---- AuthRecovering   |
//!      +--(budget spent)-----------------------+
//! AuthRecovering -> Terminated   (renewal failed, redirect to login)
//! ```
//!
//! The manager never spawns work of its own and never blocks its owner.
//! Opening, renewal and reconnect run as a stored recovery future that is
//! polled from [`ConnectionManager::recv`] (cancel-safe); its outcome comes
//! back as an [`Incoming`] for [`ConnectionManager::handle`] like any channel
//! event. Emits made while no channel is live are buffered.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use supportchat_shared::{AckResponse, ChatError, ChatResult, ConversationId};
use tokio::sync::oneshot;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use super::events::{join_event, ChannelEvent, Emit, HandshakeAuth, PushFrame, RECEIVE_MESSAGE};
use super::room::ConversationRoom;
use super::transport::{ChannelLink, Transport, TransportError};
use crate::auth::{AccessToken, RenewalError, TokenRenewer};
use crate::send::Outbound;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel; retrying at the capped delay unless closed
    Disconnected,
    /// Channel opening or waiting for the handshake
    Connecting,
    /// Handshake accepted
    Connected,
    /// Credential rejected, renewal in flight
    AuthRecovering,
    /// Renewal failed; the session must re-authenticate
    Terminated,
}

/// Backoff applied when the transport cannot be opened
///
/// Once `max_retries` is spent the outage is reported and retries continue
/// every `max_delay` until a channel opens.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Retries after the first failed attempt
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    fn backoff(&self) -> impl Iterator<Item = Duration> + Send + 'static {
        let base_ms = self.base_delay.as_millis() as u64;
        ExponentialBackoff::from_millis(2)
            .factor(base_ms / 2)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.max_retries)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub reconnect: ReconnectPolicy,
    /// Consecutive renewals allowed without an accepted handshake in between
    pub max_auth_renewals: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            max_auth_renewals: 1,
        }
    }
}

/// What the owner needs to react to
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Handshake accepted (and room joined if the conversation is known)
    Connected,
    /// A `receiveMessage` push, ready for normalization
    Inbound(PushFrame),
    /// Credential replaced and channel reopened
    CredentialRenewed,
    /// Renewal failed; redirect to login
    SessionExpired,
    /// Backoff budget spent; reported once per outage while retries continue
    ConnectionLost,
}

/// Result of the background work behind open, renewal and reconnect
pub enum Recovery {
    Opened(Result<ChannelLink, TransportError>),
    Renewed {
        token: AccessToken,
        opened: Result<ChannelLink, TransportError>,
    },
    RenewalFailed(RenewalError),
}

/// Input for [`ConnectionManager::handle`]
pub enum Incoming {
    Channel(ChannelEvent),
    Recovered(Recovery),
}

/// Owns the chat channel and the credential used to open it
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    renewer: Arc<dyn TokenRenewer>,
    token: AccessToken,
    settings: ConnectionSettings,
    state: ConnectionState,
    link: Option<ChannelLink>,
    recovery: Option<BoxFuture<'static, Recovery>>,
    room: ConversationRoom,
    auth_renewals: u32,
    outage_reported: bool,
    next_ack_id: u64,
    pending_acks: HashMap<u64, oneshot::Sender<AckResponse>>,
    send_buffer: VecDeque<Emit>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        renewer: Arc<dyn TokenRenewer>,
        token: AccessToken,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            transport,
            renewer,
            token,
            settings,
            state: ConnectionState::Disconnected,
            link: None,
            recovery: None,
            room: ConversationRoom::new(),
            auth_renewals: 0,
            outage_reported: false,
            next_ack_id: 1,
            pending_acks: HashMap::new(),
            send_buffer: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Credential currently in use; replaced on renewal
    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.room.conversation_id()
    }

    pub fn is_live(&self) -> bool {
        self.state == ConnectionState::Connected && self.link.is_some()
    }

    /// Emits waiting for a live channel
    pub fn buffered(&self) -> usize {
        self.send_buffer.len()
    }

    /// Start opening the channel with the current credential
    ///
    /// Returns immediately; the channel comes up through [`recv`](Self::recv).
    pub fn open(&mut self) -> ChatResult<()> {
        if self.state == ConnectionState::Terminated {
            return Err(ChatError::Closed);
        }
        if self.link.is_some() || self.recovery.is_some() {
            return Ok(());
        }
        self.start_connect();
        Ok(())
    }

    /// Scope the channel to a conversation, joining now if the channel is live
    pub fn set_conversation(&mut self, conversation_id: ConversationId) {
        if self.room.set_conversation(conversation_id) {
            self.join_if_ready();
        }
    }

    /// Next channel event or recovery outcome
    ///
    /// Cancel-safe. Never resolves while there is neither a channel nor
    /// recovery work in flight.
    pub async fn recv(&mut self) -> Incoming {
        let link = self.link.as_mut();
        let recovery = self.recovery.as_mut();

        let incoming = tokio::select! {
            event = async {
                match link {
                    Some(link) => link.recv().await,
                    None => std::future::pending().await,
                }
            } => Incoming::Channel(event.unwrap_or_else(|| ChannelEvent::Closed {
                reason: "transport dropped".to_string(),
            })),
            outcome = async {
                match recovery {
                    Some(recovery) => recovery.await,
                    None => std::future::pending().await,
                }
            } => Incoming::Recovered(outcome),
        };

        if matches!(incoming, Incoming::Recovered(_)) {
            self.recovery = None;
        }
        incoming
    }

    /// Apply one input to the state machine
    pub fn handle(&mut self, incoming: Incoming) -> Option<ConnectionEvent> {
        match incoming {
            Incoming::Channel(event) => self.on_channel(event),
            Incoming::Recovered(outcome) => self.on_recovery(outcome),
        }
    }

    /// Convenience loop over [`recv`](Self::recv) and [`handle`](Self::handle)
    pub async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            let incoming = self.recv().await;
            if let Some(event) = self.handle(incoming) {
                return event;
            }
        }
    }

    /// Tear the channel down
    ///
    /// Idempotent. In-flight renewal or reconnect work, pending
    /// acknowledgements and buffered emits are dropped and no further events
    /// are delivered.
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            tracing::info!(
                conversation_id = ?self.room.conversation_id(),
                "Chat channel closed"
            );
        }
        self.recovery = None;
        self.room.leave();
        self.pending_acks.clear();
        self.send_buffer.clear();
        if self.state != ConnectionState::Terminated {
            self.state = ConnectionState::Disconnected;
        }
    }

    // =========================================================================
    // Event handling
    // =========================================================================

    fn on_channel(&mut self, event: ChannelEvent) -> Option<ConnectionEvent> {
        match event {
            ChannelEvent::Connected { sid } => {
                self.state = ConnectionState::Connected;
                self.auth_renewals = 0;
                self.outage_reported = false;
                tracing::info!(sid = ?sid, "Chat channel connected");

                self.join_if_ready();
                self.flush_buffer();
                Some(ConnectionEvent::Connected)
            }
            ChannelEvent::AuthRejected { message } => self.recover_credential(message),
            ChannelEvent::Event { name, args } if name == RECEIVE_MESSAGE => {
                match args.into_iter().next().map(serde_json::from_value::<PushFrame>) {
                    Some(Ok(frame)) => Some(ConnectionEvent::Inbound(frame)),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Dropping unreadable message push");
                        None
                    }
                    None => {
                        tracing::warn!("Dropping message push without payload");
                        None
                    }
                }
            }
            ChannelEvent::Event { name, .. } => {
                tracing::debug!(event = %name, "Ignoring unhandled channel event");
                None
            }
            ChannelEvent::Ack { id, args } => {
                self.resolve_ack(id, args);
                None
            }
            ChannelEvent::Closed { reason } => {
                self.drop_link();
                if self.state == ConnectionState::Terminated {
                    return None;
                }
                tracing::warn!(reason = %reason, "Chat channel lost, reconnecting");
                self.start_connect();
                None
            }
        }
    }

    fn on_recovery(&mut self, outcome: Recovery) -> Option<ConnectionEvent> {
        match outcome {
            Recovery::Opened(opened) => self.on_opened(opened),
            Recovery::Renewed { token, opened } => {
                self.token = token;
                tracing::info!("Chat channel reopening with renewed credential");
                match self.on_opened(opened) {
                    None => Some(ConnectionEvent::CredentialRenewed),
                    lost => lost,
                }
            }
            Recovery::RenewalFailed(e) => {
                tracing::error!(error = %e, "Token renewal failed");
                self.terminate();
                Some(ConnectionEvent::SessionExpired)
            }
        }
    }

    fn on_opened(
        &mut self,
        opened: Result<ChannelLink, TransportError>,
    ) -> Option<ConnectionEvent> {
        match opened {
            Ok(link) => {
                self.link = Some(link);
                self.state = ConnectionState::Connecting;
                tracing::debug!("Chat channel opened, awaiting handshake");
                None
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                self.start_steady_retry();
                if self.outage_reported {
                    return None;
                }
                self.outage_reported = true;
                tracing::error!(error = %e, "Could not open chat channel, still retrying");
                Some(ConnectionEvent::ConnectionLost)
            }
        }
    }

    fn recover_credential(&mut self, message: String) -> Option<ConnectionEvent> {
        tracing::warn!(reason = %message, "Chat channel rejected credential");
        self.drop_link();

        if self.auth_renewals >= self.settings.max_auth_renewals {
            tracing::error!(
                renewals = self.auth_renewals,
                "Renewed credential was rejected again"
            );
            self.terminate();
            return Some(ConnectionEvent::SessionExpired);
        }
        self.auth_renewals += 1;
        self.state = ConnectionState::AuthRecovering;

        let renewer = Arc::clone(&self.renewer);
        let transport = Arc::clone(&self.transport);
        let backoff = self.settings.reconnect.backoff();

        // The reconnect is sequenced after the renewal and presents its token
        self.recovery = Some(
            async move {
                match renewer.renew().await {
                    Ok(token) => {
                        let auth = HandshakeAuth::bearer(&token);
                        let opened = open_with_retry(transport, auth, backoff).await;
                        Recovery::Renewed { token, opened }
                    }
                    Err(e) => Recovery::RenewalFailed(e),
                }
            }
            .boxed(),
        );
        None
    }

    fn start_connect(&mut self) {
        self.state = ConnectionState::Connecting;
        let auth = HandshakeAuth::bearer(&self.token);
        let transport = Arc::clone(&self.transport);
        let backoff = self.settings.reconnect.backoff();

        self.recovery = Some(
            async move { Recovery::Opened(open_with_retry(transport, auth, backoff).await) }
                .boxed(),
        );
    }

    fn start_steady_retry(&mut self) {
        let auth = HandshakeAuth::bearer(&self.token);
        let transport = Arc::clone(&self.transport);
        let delay = self.settings.reconnect.max_delay;

        self.recovery = Some(
            async move {
                tokio::time::sleep(delay).await;
                Recovery::Opened(open_with_retry(transport, auth, std::iter::repeat(delay)).await)
            }
            .boxed(),
        );
    }

    fn terminate(&mut self) {
        self.close();
        self.state = ConnectionState::Terminated;
    }

    fn drop_link(&mut self) {
        self.link = None;
        self.room.leave();

        // Emits already written to the old channel will never be acknowledged
        let buffered: HashSet<u64> = self.send_buffer.iter().filter_map(|e| e.ack).collect();
        self.pending_acks.retain(|id, _| buffered.contains(id));
    }

    fn join_if_ready(&mut self) {
        let live = self.is_live();
        let Some(conversation_id) = self.room.pending_join(live).cloned() else {
            return;
        };
        let Some(link) = self.link.as_ref() else {
            return;
        };

        let join = Emit {
            name: join_event(&conversation_id),
            args: Vec::new(),
            ack: None,
        };
        if link.send(join).is_ok() {
            self.room.mark_joined();
            tracing::debug!(
                conversation_id = %conversation_id,
                "Joined conversation room"
            );
        }
    }

    fn flush_buffer(&mut self) {
        let Some(link) = self.link.as_ref() else {
            return;
        };

        let mut flushed = 0;
        while let Some(emit) = self.send_buffer.pop_front() {
            if let Err(emit) = link.send(emit) {
                self.send_buffer.push_front(emit);
                break;
            }
            flushed += 1;
        }

        if flushed > 0 {
            tracing::debug!(flushed, "Flushed buffered emits");
        }
    }

    fn emit(&mut self, emit: Emit) {
        if self.state == ConnectionState::Connected {
            if let Some(link) = self.link.as_ref() {
                match link.send(emit) {
                    Ok(()) => return,
                    Err(emit) => {
                        self.send_buffer.push_back(emit);
                        return;
                    }
                }
            }
        }
        self.send_buffer.push_back(emit);
    }

    fn resolve_ack(&mut self, id: u64, args: Vec<Value>) {
        let Some(sender) = self.pending_acks.remove(&id) else {
            tracing::debug!(ack_id = id, "Acknowledgement for unknown emit");
            return;
        };

        let ack = match args.into_iter().next().map(serde_json::from_value::<AckResponse>) {
            Some(Ok(ack)) => ack,
            Some(Err(e)) => {
                tracing::warn!(error = %e, ack_id = id, "Unreadable acknowledgement payload");
                AckResponse::default()
            }
            None => AckResponse::default(),
        };
        let _ = sender.send(ack);
    }
}

/// Open a channel, retrying on the given delays
async fn open_with_retry<S>(
    transport: Arc<dyn Transport>,
    auth: HandshakeAuth,
    strategy: S,
) -> Result<ChannelLink, TransportError>
where
    S: IntoIterator<Item = Duration>,
{
    Retry::spawn(strategy, || {
        let transport = Arc::clone(&transport);
        let auth = auth.clone();
        async move {
            let result = transport.open(&auth).await;
            if let Err(e) = &result {
                tracing::debug!(error = %e, "Channel open attempt failed");
            }
            result
        }
    })
    .await
}

impl Outbound for ConnectionManager {
    fn emit_with_ack(&mut self, event: &str, payload: Value) -> oneshot::Receiver<AckResponse> {
        let (tx, rx) = oneshot::channel();
        if self.state == ConnectionState::Terminated {
            tracing::debug!(event = %event, "Dropping emit on terminated channel");
            return rx;
        }

        let id = self.next_ack_id;
        self.next_ack_id += 1;
        self.pending_acks.insert(id, tx);

        self.emit(Emit {
            name: event.to_string(),
            args: vec![payload],
            ack: Some(id),
        });
        rx
    }
}
