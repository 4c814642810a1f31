// crates/client/src/socket.rs
//! WebSocket session client for the multi-turn chat playground.
//!
//! A [`SocketClient`] holds at most one live session. Every operation that
//! replaces or ends the session (initialize, reconnect, retry, cancel,
//! disconnect) first tears the old one down and waits for its close
//! handshake, so two sockets are never current at once. The methods take
//! `&mut self`, which gives the same last-writer-wins discipline as a single
//! "current socket" field without any locking.
//!
//! Transport failures are reported through `on_error`/`on_disconnect` and are
//! never retried automatically. The only implicit reconnect is the one inside
//! [`SocketClient::reconnect`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use proposal_stream_core::{ChatKind, InboundEnvelope, OutboundEnvelope, Tool};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::SocketError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket held.
    Idle,
    /// Socket created, handshake pending.
    Connecting,
    Connected,
    /// Socket closed; `on_disconnect` has fired.
    Disconnected,
}

/// Why a session ended. Lets the UI tell "cancelled by user" apart from
/// "connection lost".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect`, `reconnect` or `retry_connection`.
    Requested,
    /// `cancel_ongoing_request`.
    Cancelled,
    /// `initialize` started a new session over this one.
    Replaced,
    /// The server closed the socket.
    Closed,
    /// Handshake or transport failure.
    Failed,
}

impl DisconnectReason {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Requested => "Disconnected",
            Self::Cancelled => "Cancelled by user",
            Self::Replaced => "Switched conversation",
            Self::Closed | Self::Failed => "Connection lost",
        }
    }
}

type MessageFn = Arc<dyn Fn(InboundEnvelope) + Send + Sync>;
type ConnectFn = Arc<dyn Fn() + Send + Sync>;
type DisconnectFn = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&SocketError) + Send + Sync>;

/// Callbacks for one session. Cheap to clone; kept by the client so
/// `reconnect` and `retry_connection` can rebind them to a new socket.
#[derive(Clone)]
pub struct SessionCallbacks {
    on_message: MessageFn,
    on_connect: Option<ConnectFn>,
    on_disconnect: Option<DisconnectFn>,
    on_error: Option<ErrorFn>,
}

impl SessionCallbacks {
    pub fn new(on_message: impl Fn(InboundEnvelope) + Send + Sync + 'static) -> Self {
        Self {
            on_message: Arc::new(on_message),
            on_connect: None,
            on_disconnect: None,
            on_error: None,
        }
    }

    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&SocketError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    fn message(&self, envelope: InboundEnvelope) {
        (self.on_message)(envelope);
    }

    fn connected(&self) {
        if let Some(f) = &self.on_connect {
            f();
        }
    }

    fn disconnected(&self, reason: DisconnectReason) {
        if let Some(f) = &self.on_disconnect {
            f(reason);
        }
    }

    fn error(&self, err: &SocketError) {
        if let Some(f) = &self.on_error {
            f(err);
        }
    }
}

impl std::fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tracked {
    generation: u64,
    state: ConnectionState,
}

/// State writer bound to one session generation. Writes from a stale
/// generation are dropped.
#[derive(Clone)]
struct StateHandle {
    tx: Arc<watch::Sender<Tracked>>,
    generation: u64,
}

impl StateHandle {
    fn set(&self, state: ConnectionState) {
        let generation = self.generation;
        self.tx.send_if_modified(|tracked| {
            if tracked.generation != generation || tracked.state == state {
                return false;
            }
            tracked.state = state;
            true
        });
    }
}

/// The (user, thread) pair a session is bound to, plus its callbacks.
struct Binding {
    user_id: String,
    thread_id: String,
    callbacks: SessionCallbacks,
}

struct SocketSession {
    outbound: mpsc::UnboundedSender<String>,
    stop: Option<oneshot::Sender<DisconnectReason>>,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    connect: Duration,
    close: Duration,
}

pub struct SocketClient {
    config: ClientConfig,
    binding: Option<Binding>,
    session: Option<SocketSession>,
    state: Arc<watch::Sender<Tracked>>,
    generation: u64,
    reconnect_attempts: u32,
}

impl SocketClient {
    pub fn new(config: ClientConfig) -> Self {
        let (tx, _rx) = watch::channel(Tracked {
            generation: 0,
            state: ConnectionState::Idle,
        });
        Self {
            config,
            binding: None,
            session: None,
            state: Arc::new(tx),
            generation: 0,
            reconnect_attempts: 0,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn user_id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.user_id.as_str())
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.thread_id.as_str())
    }

    /// Wait until the current session reaches `target`.
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        within: Duration,
    ) -> Result<(), SocketError> {
        let mut rx = self.state.subscribe();
        let wait = async move { rx.wait_for(|t| t.state == target).await.map(|_| ()) };
        match tokio::time::timeout(within, wait).await {
            Ok(Ok(())) => Ok(()),
            _ => Err(SocketError::Timeout(target)),
        }
    }

    /// Bind to `(user_id, thread_id)` and start connecting. Any existing
    /// session is closed first. Returns once the connection task is spawned;
    /// `on_connect` fires when the handshake completes.
    pub async fn initialize(
        &mut self,
        user_id: impl Into<String>,
        thread_id: impl Into<String>,
        callbacks: SessionCallbacks,
    ) -> Result<(), SocketError> {
        self.teardown(DisconnectReason::Replaced).await;
        self.binding = Some(Binding {
            user_id: user_id.into(),
            thread_id: thread_id.into(),
            callbacks,
        });
        self.connect()
    }

    /// Send one user turn. Fails without touching the network when there is
    /// no session or it is not connected.
    pub fn send_message(
        &self,
        thread_id: &str,
        message: &str,
        kind: ChatKind,
        tool: Option<Tool>,
        contexts: &[String],
    ) -> Result<(), SocketError> {
        let envelope = OutboundEnvelope::new(thread_id, kind, message)
            .with_tool(tool)
            .with_contexts(contexts.iter().cloned());
        self.send_envelope(&envelope)
    }

    pub fn send_envelope(&self, envelope: &OutboundEnvelope) -> Result<(), SocketError> {
        let session = self.session.as_ref().ok_or(SocketError::NotInitialized)?;
        if !self.is_connected() {
            return Err(SocketError::NotConnected);
        }
        let text = envelope.to_json()?;
        session
            .outbound
            .send(text)
            .map_err(|_| SocketError::NotConnected)?;
        debug!(thread_id = %envelope.thread_id, kind = ?envelope.kind, "Queued chat envelope");
        Ok(())
    }

    /// Re-read the endpoint config, optionally switch thread, close the
    /// current socket and open a new one after `reconnect_delay`.
    pub async fn reconnect(&mut self, thread_id: Option<String>) -> Result<(), SocketError> {
        self.config.apply_env();
        let binding = self.binding.as_mut().ok_or(SocketError::NotInitialized)?;
        if let Some(thread_id) = thread_id {
            binding.thread_id = thread_id;
        }

        self.teardown(DisconnectReason::Requested).await;
        // Let the old close handshake settle before a new socket opens.
        tokio::time::sleep(self.config.reconnect_delay()).await;

        self.reconnect_attempts += 1;
        info!(attempt = self.reconnect_attempts, "Reconnecting WebSocket");
        self.connect()
    }

    /// Abort the in-flight turn. Closes the socket like `disconnect`, but
    /// reports [`DisconnectReason::Cancelled`]. Returns whether a session
    /// was open.
    pub async fn cancel_ongoing_request(&mut self) -> bool {
        let had_session = self.teardown(DisconnectReason::Cancelled).await;
        if had_session {
            info!("Cancelled in-flight turn");
        }
        self.state_handle().set(ConnectionState::Idle);
        had_session
    }

    /// Explicit retry after a connection error: refresh config, reset the
    /// attempt counter and connect again immediately.
    pub async fn retry_connection(&mut self) -> Result<(), SocketError> {
        self.config.apply_env();
        if self.binding.is_none() {
            return Err(SocketError::NotInitialized);
        }
        self.reconnect_attempts = 0;
        self.teardown(DisconnectReason::Requested).await;
        info!("Retrying WebSocket connection");
        self.connect()
    }

    pub async fn disconnect(&mut self) {
        if self.teardown(DisconnectReason::Requested).await {
            info!("WebSocket disconnected");
        }
        self.state_handle().set(ConnectionState::Idle);
    }

    fn state_handle(&self) -> StateHandle {
        StateHandle {
            tx: self.state.clone(),
            generation: self.generation,
        }
    }

    fn connect(&mut self) -> Result<(), SocketError> {
        let binding = self.binding.as_ref().ok_or(SocketError::NotInitialized)?;
        let url = self.config.socket_url(&binding.user_id, &binding.thread_id)?;

        self.generation += 1;
        let generation = self.generation;
        self.state.send_replace(Tracked {
            generation,
            state: ConnectionState::Connecting,
        });

        let handle = StateHandle {
            tx: self.state.clone(),
            generation,
        };
        let timeouts = Timeouts {
            connect: self.config.connect_timeout(),
            close: self.config.close_timeout(),
        };
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        info!(
            user_id = %binding.user_id,
            thread_id = %binding.thread_id,
            generation,
            "Opening WebSocket session"
        );
        let task = tokio::spawn(run_connection(
            url,
            binding.callbacks.clone(),
            handle,
            outbound_rx,
            stop_rx,
            timeouts,
        ));

        self.session = Some(SocketSession {
            outbound: outbound_tx,
            stop: Some(stop_tx),
            task,
        });
        Ok(())
    }

    /// Close the current session and wait for its task to finish. Returns
    /// false when there was nothing to close.
    async fn teardown(&mut self, reason: DisconnectReason) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };

        if let Some(stop) = session.stop.take() {
            // Err means the task already ended on its own.
            let _ = stop.send(reason);
        }

        let grace = self.config.close_timeout() * 2;
        match tokio::time::timeout(grace, &mut session.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "WebSocket task ended abnormally"),
            Err(_) => {
                warn!(?reason, "WebSocket task did not stop in time, aborting");
                session.task.abort();
                self.state_handle().set(ConnectionState::Disconnected);
                if let Some(binding) = &self.binding {
                    binding.callbacks.disconnected(reason);
                }
            }
        }
        true
    }
}

async fn run_connection(
    url: Url,
    callbacks: SessionCallbacks,
    state: StateHandle,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut stop: oneshot::Receiver<DisconnectReason>,
    timeouts: Timeouts,
) {
    let connecting = tokio::time::timeout(timeouts.connect, connect_async(url.as_str()));
    let result = tokio::select! {
        reason = &mut stop => {
            let reason = reason.unwrap_or(DisconnectReason::Requested);
            debug!(?reason, "WebSocket stopped before handshake completed");
            state.set(ConnectionState::Disconnected);
            callbacks.disconnected(reason);
            return;
        }
        result = connecting => result,
    };

    let ws = match result {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            warn!(%url, error = %e, "WebSocket connect failed");
            state.set(ConnectionState::Disconnected);
            callbacks.error(&SocketError::Connect(e));
            callbacks.disconnected(DisconnectReason::Failed);
            return;
        }
        Err(_) => {
            warn!(%url, "WebSocket connect timed out");
            state.set(ConnectionState::Disconnected);
            callbacks.error(&SocketError::Timeout(ConnectionState::Connected));
            callbacks.disconnected(DisconnectReason::Failed);
            return;
        }
    };

    state.set(ConnectionState::Connected);
    info!(%url, "WebSocket connected");
    callbacks.connected();

    let (mut sink, mut stream) = ws.split();

    let reason = loop {
        tokio::select! {
            reason = &mut stop => {
                let reason = reason.unwrap_or(DisconnectReason::Requested);
                close_gracefully(&mut sink, &mut stream, timeouts.close).await;
                break reason;
            }
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!(error = %e, "WebSocket send failed");
                        callbacks.error(&SocketError::Transport(e));
                        break DisconnectReason::Failed;
                    }
                }
                // Client dropped.
                None => {
                    close_gracefully(&mut sink, &mut stream, timeouts.close).await;
                    break DisconnectReason::Requested;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(envelope) = InboundEnvelope::from_frame(&text) {
                        callbacks.message(envelope);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Server closed WebSocket");
                    break DisconnectReason::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket read failed");
                    callbacks.error(&SocketError::Transport(e));
                    break DisconnectReason::Failed;
                }
                None => break DisconnectReason::Closed,
            },
        }
    };

    state.set(ConnectionState::Disconnected);
    info!(?reason, "WebSocket session ended");
    callbacks.disconnected(reason);
}

/// Send a close frame and wait (bounded) for the server's reply.
async fn close_gracefully(
    sink: &mut SplitSink<WsStream, Message>,
    stream: &mut SplitStream<WsStream>,
    timeout: Duration,
) {
    if let Err(e) = sink.send(Message::Close(None)).await {
        debug!(error = %e, "Close frame not sent");
        return;
    }
    let drain = async {
        while let Some(Ok(frame)) = stream.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
    };
    if tokio::time::timeout(timeout, drain).await.is_err() {
        debug!("Close handshake timed out");
    }
}
