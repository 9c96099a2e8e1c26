//! In-process loopback provider.
//!
//! [`LoopbackProvider`] plays the server side of a session without any
//! network: it decides which security postures it accepts, records every
//! connect attempt and outbound chat, and lets the owner inject inbound
//! events or sever the stream. Cloning the provider shares the same server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{ChatEvent, ConnectOptions, ProtocolProvider, ProviderError, ProviderEvent, SessionHandle};
use crate::session::posture::SecurityPosture;

/// Resource appended to echoed traffic when the target has none.
const ECHO_RESOURCE: &str = "loopback";

type Inbound = Result<ProviderEvent, ProviderError>;
type AcceptFn = dyn Fn(&SecurityPosture) -> bool + Send + Sync;

struct Connection {
    tx: mpsc::UnboundedSender<Inbound>,
    closed: Arc<AtomicBool>,
}

struct ServerState {
    accept: Arc<AcceptFn>,
    attempts: Vec<SecurityPosture>,
    sent: Vec<ChatEvent>,
    current: Option<Connection>,
    connects: usize,
    closes: usize,
}

fn lock(state: &Mutex<ServerState>) -> MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process server and provider.
#[derive(Clone)]
pub struct LoopbackProvider {
    state: Arc<Mutex<ServerState>>,
    fail_sends: Arc<AtomicBool>,
    echo: Arc<AtomicBool>,
}

impl std::fmt::Debug for LoopbackProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("LoopbackProvider")
            .field("attempts", &state.attempts.len())
            .field("sent", &state.sent.len())
            .field("connected", &state.current.is_some())
            .finish()
    }
}

impl Default for LoopbackProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackProvider {
    /// Create a server that accepts every posture.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                accept: Arc::new(|_| true),
                attempts: Vec::new(),
                sent: Vec::new(),
                current: None,
                connects: 0,
                closes: 0,
            })),
            fail_sends: Arc::new(AtomicBool::new(false)),
            echo: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Accept only postures for which `accept` returns `true`.
    pub fn accept_when<F>(&self, accept: F)
    where
        F: Fn(&SecurityPosture) -> bool + Send + Sync + 'static,
    {
        lock(&self.state).accept = Arc::new(accept);
    }

    /// Refuse every connect attempt.
    pub fn reject_all(&self) {
        self.accept_when(|_| false);
    }

    /// Accept every connect attempt.
    pub fn accept_all(&self) {
        self.accept_when(|_| true);
    }

    /// Make outbound sends fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Reflect every outbound chat back as inbound traffic from its target.
    pub fn echo(&self, enabled: bool) {
        self.echo.store(enabled, Ordering::SeqCst);
    }

    /// Postures of every connect attempt, in order.
    pub fn attempts(&self) -> Vec<SecurityPosture> {
        lock(&self.state).attempts.clone()
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> usize {
        lock(&self.state).connects
    }

    /// Outbound chats received by the server.
    pub fn sent(&self) -> Vec<ChatEvent> {
        lock(&self.state).sent.clone()
    }

    /// Number of times a handle was closed by the client.
    pub fn close_count(&self) -> usize {
        lock(&self.state).closes
    }

    /// Push an inbound event onto the current connection.
    ///
    /// Returns `false` when there is no open connection.
    pub fn deliver(&self, event: ProviderEvent) -> bool {
        let state = lock(&self.state);
        match &state.current {
            Some(conn) if !conn.closed.load(Ordering::SeqCst) => conn.tx.send(Ok(event)).is_ok(),
            _ => false,
        }
    }

    /// Push an inbound `chat` message from `remote`.
    pub fn deliver_chat(&self, remote: &str, text: &str) -> bool {
        self.deliver(ProviderEvent::Chat(ChatEvent::chat(remote, text)))
    }

    /// Terminate the current connection's inbound stream.
    ///
    /// Returns `false` when there is no open connection.
    pub fn sever(&self) -> bool {
        let mut state = lock(&self.state);
        match state.current.take() {
            Some(conn) => conn
                .tx
                .send(Err(ProviderError::Stream("connection reset by peer".to_owned())))
                .is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ProtocolProvider for LoopbackProvider {
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn SessionHandle>, ProviderError> {
        let mut state = lock(&self.state);
        state.attempts.push(options.posture);
        if !(state.accept)(&options.posture) {
            debug!(posture = %options.posture, "loopback refused connect");
            return Err(ProviderError::Connect(format!(
                "server refused posture {}",
                options.posture
            )));
        }

        state.connects = state.connects.saturating_add(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        state.current = Some(Connection {
            tx: tx.clone(),
            closed: Arc::clone(&closed),
        });
        debug!(posture = %options.posture, user = %options.username, "loopback accepted connect");

        Ok(Arc::new(LoopbackHandle {
            rx: tokio::sync::Mutex::new(rx),
            tx,
            closed,
            provider: self.clone(),
        }))
    }
}

/// Client side of one loopback connection.
struct LoopbackHandle {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    tx: mpsc::UnboundedSender<Inbound>,
    closed: Arc<AtomicBool>,
    provider: LoopbackProvider,
}

#[async_trait]
impl SessionHandle for LoopbackHandle {
    async fn recv(&self) -> Result<ProviderEvent, ProviderError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::Closed);
        }
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(item) => item,
            None => Err(ProviderError::Stream("server hung up".to_owned())),
        }
    }

    async fn send(&self, chat: ChatEvent) -> Result<(), ProviderError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::Closed);
        }
        if self.provider.fail_sends.load(Ordering::SeqCst) {
            return Err(ProviderError::Send("server rejected message".to_owned()));
        }
        lock(&self.provider.state).sent.push(chat.clone());

        if self.provider.echo.load(Ordering::SeqCst) {
            let remote = if chat.remote.contains('/') {
                chat.remote
            } else {
                format!("{}/{ECHO_RESOURCE}", chat.remote)
            };
            let reply = ChatEvent {
                remote,
                kind: chat.kind,
                text: chat.text,
            };
            // Receiver only goes away once the handle is dropped.
            let _ = self.tx.send(Ok(ProviderEvent::Chat(reply)));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ProviderError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ProviderError::Closed);
        }
        let mut state = lock(&self.provider.state);
        state.closes = state.closes.saturating_add(1);
        drop(state);
        let _ = self.tx.send(Err(ProviderError::Closed));
        Ok(())
    }
}
