//! Session manager: connection lifecycle for one account.
//!
//! [`SessionManager::start`] walks the security fallback ladder until a
//! connect succeeds, notifies the listener and spawns a receive loop. The loop
//! dispatches chat messages to the listener and, when the stream fails, tears
//! the connection down and schedules a restart according to the
//! [`ReconnectPolicy`].
//!
//! Start and stop are serialized by an async lifecycle lock. The receive loop
//! only holds a weak reference, so dropping every manager clone ends it.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::address::Address;
use crate::credentials::Credentials;
use crate::provider::{
    ChatEvent, ConnectOptions, PresenceStatus, ProtocolProvider, ProviderError, ProviderEvent,
    SessionHandle,
};

pub mod dispatch;
pub mod listener;
pub mod posture;
pub mod reconnect;

pub use dispatch::DispatchMode;
pub use listener::{InboundMessage, NoopListener, SessionListener};
pub use posture::SecurityPosture;
pub use reconnect::ReconnectPolicy;

use self::dispatch::{Dispatcher, Notification};

/// Buffered inbound messages per subscriber before it starts lagging.
const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 64;

// ── Errors ─────────────────────────────────────────────────────

/// Errors surfaced to callers of the session manager.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No connection is currently established.
    #[error("transport unavailable")]
    TransportUnavailable,

    /// Every posture on the fallback ladder failed. Carries the last failure.
    #[error("connection failed after exhausting security fallbacks: {0}")]
    ConnectFailed(#[source] ProviderError),

    /// The provider rejected an outbound message.
    #[error(transparent)]
    Transport(ProviderError),

    /// No inbound message arrived in time.
    #[error("timed out waiting for an inbound message")]
    Timeout,

    /// The inbound message broadcast closed.
    #[error("inbound message stream closed")]
    SubscriptionClosed,
}

// ── Options and status ─────────────────────────────────────────

/// Tunables for a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Posture the fallback ladder starts from on every `start`.
    pub posture: SecurityPosture,
    /// Initial presence announced on connect.
    pub presence: PresenceStatus,
    /// Initial presence status message.
    pub status_message: String,
    /// Auto-restart behaviour after a stream failure.
    pub reconnect: ReconnectPolicy,
    /// How inbound messages reach the listener.
    pub dispatch: DispatchMode,
    /// Per-subscriber buffer for [`SessionManager::subscribe`].
    pub subscription_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            posture: SecurityPosture::STRICT,
            presence: PresenceStatus::ExtendedAway,
            status_message: String::new(),
            reconnect: ReconnectPolicy::default(),
            dispatch: DispatchMode::Concurrent,
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
        }
    }
}

/// Point-in-time snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// Account username.
    pub username: String,
    /// Server address.
    pub server: String,
    /// Whether a session is up.
    pub running: bool,
    /// Identifier of the current connection.
    pub connection_id: Option<Uuid>,
    /// Posture the current connection was established with.
    pub posture: Option<SecurityPosture>,
    /// Last outbound send attempt.
    pub last_sent: Option<DateTime<Utc>>,
    /// Last accepted inbound message.
    pub last_received: Option<DateTime<Utc>>,
    /// Consecutive automatic restart attempts since the last good connect.
    pub reconnect_attempts: u32,
}

// ── Manager ────────────────────────────────────────────────────

struct ActiveConnection {
    id: Uuid,
    handle: Arc<dyn SessionHandle>,
    posture: SecurityPosture,
    shutdown: watch::Sender<bool>,
}

struct Inner {
    credentials: Credentials,
    options: SessionOptions,
    provider: Arc<dyn ProtocolProvider>,
    listener: RwLock<Arc<dyn SessionListener>>,
    lifecycle: tokio::sync::Mutex<()>,
    connection: RwLock<Option<ActiveConnection>>,
    running: AtomicBool,
    last_sent: Mutex<Option<DateTime<Utc>>>,
    last_received: Mutex<Option<DateTime<Utc>>>,
    reconnect_attempts: AtomicU32,
    restart_epoch: AtomicU64,
    pending_restart: Mutex<Option<JoinHandle<()>>>,
    inbound: broadcast::Sender<InboundMessage>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Maintains one account's session to the messaging server.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("credentials", &self.inner.credentials)
            .field("running", &self.is_running())
            .field("connection_id", &self.connection_id())
            .finish()
    }
}

impl SessionManager {
    /// Create a manager with default options (strict posture, extended-away
    /// presence, 5 s first restart delay, concurrent dispatch).
    pub fn new(credentials: Credentials, provider: Arc<dyn ProtocolProvider>) -> Self {
        Self::with_options(credentials, provider, SessionOptions::default())
    }

    /// Create a manager with explicit options.
    pub fn with_options(
        credentials: Credentials,
        provider: Arc<dyn ProtocolProvider>,
        options: SessionOptions,
    ) -> Self {
        let (inbound, _) = broadcast::channel(options.subscription_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                credentials,
                options,
                provider,
                listener: RwLock::new(Arc::new(NoopListener)),
                lifecycle: tokio::sync::Mutex::new(()),
                connection: RwLock::new(None),
                running: AtomicBool::new(false),
                last_sent: Mutex::new(None),
                last_received: Mutex::new(None),
                reconnect_attempts: AtomicU32::new(0),
                restart_epoch: AtomicU64::new(0),
                pending_restart: Mutex::new(None),
                inbound,
            }),
        }
    }

    /// Account credentials.
    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    /// Options this manager was built with.
    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Establish the session, degrading security one step per failure.
    ///
    /// Always begins from the configured posture. On success the listener's
    /// `on_connected` runs before the receive loop is spawned. A call while
    /// already running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectFailed`] with the last provider error
    /// once every posture on the ladder has failed.
    pub async fn start(&self) -> Result<(), SessionError> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.is_running() {
            debug!(username = %self.inner.credentials.username(), "session already running");
            return Ok(());
        }
        self.connect_locked().await
    }

    /// Tear down the session and cancel any pending automatic restart.
    ///
    /// Never fails. Repeated calls are no-ops; the listener's
    /// `on_disconnected` only runs when a connection was actually closed.
    pub async fn stop(&self) {
        self.cancel_restart();

        let _guard = self.inner.lifecycle.lock().await;
        // A stream failure may have read the epoch between the bump above and
        // this lock.
        self.cancel_restart();
        debug!(
            username = %self.inner.credentials.username(),
            server = %self.inner.credentials.server(),
            "stopping session"
        );
        if !self.teardown_locked().await {
            debug!("session already stopped");
        }
    }

    fn cancel_restart(&self) {
        self.inner.restart_epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(pending) = lock(&self.inner.pending_restart).take() {
            pending.abort();
        }
    }

    async fn connect_locked(&self) -> Result<(), SessionError> {
        let username = self.inner.credentials.username();
        let server = self.inner.credentials.server();
        debug!(username, server, "connecting");

        let mut last_error = None;
        for posture in self.inner.options.posture.ladder() {
            let options = self.connect_options(posture);
            match self.inner.provider.connect(&options).await {
                Ok(handle) => {
                    self.install_locked(handle, posture).await;
                    return Ok(());
                }
                Err(e) => {
                    debug!(username, %posture, error = %e, "connect attempt failed, degrading");
                    last_error = Some(e);
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| ProviderError::Connect("no security posture attempted".to_owned()));
        warn!(username, server, error = %error, "connection failed, security fallbacks exhausted");
        Err(SessionError::ConnectFailed(error))
    }

    fn connect_options(&self, posture: SecurityPosture) -> ConnectOptions {
        ConnectOptions {
            host: self.inner.credentials.server().to_owned(),
            username: self.inner.credentials.username().to_owned(),
            password: self.inner.credentials.password().to_owned(),
            posture,
            establish_session: true,
            status: self.inner.options.presence,
            status_message: self.inner.options.status_message.clone(),
        }
    }

    async fn install_locked(&self, handle: Arc<dyn SessionHandle>, posture: SecurityPosture) {
        let id = Uuid::new_v4();
        let (shutdown, shutdown_rx) = watch::channel(false);
        *write(&self.inner.connection) = Some(ActiveConnection {
            id,
            handle: Arc::clone(&handle),
            posture,
            shutdown,
        });

        dispatch::notify(self.listener(), Notification::Connected).await;
        info!(
            username = %self.inner.credentials.username(),
            connection_id = %id,
            %posture,
            "connected"
        );
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);

        tokio::spawn(receive_loop(
            Arc::downgrade(&self.inner),
            id,
            handle,
            shutdown_rx,
            self.inner.options.dispatch,
        ));
    }

    /// Remove and close the current connection. Returns `false` if there was
    /// none.
    async fn teardown_locked(&self) -> bool {
        let taken = write(&self.inner.connection).take();
        self.inner.running.store(false, Ordering::SeqCst);
        let Some(conn) = taken else {
            return false;
        };

        let _ = conn.shutdown.send(true);
        dispatch::notify(self.listener(), Notification::Disconnected).await;

        let handle = Arc::clone(&conn.handle);
        match tokio::spawn(async move { handle.close().await }).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(connection_id = %conn.id, error = %e, "error closing session handle"),
            Err(e) => warn!(connection_id = %conn.id, error = %e, "session handle close panicked"),
        }
        info!(
            username = %self.inner.credentials.username(),
            connection_id = %conn.id,
            "disconnected"
        );
        true
    }

    // ── Stream failure and restart ─────────────────────────────

    async fn on_stream_failure(&self, id: Uuid, err: ProviderError) {
        error!(connection_id = %id, error = %err, "receive stream failed");
        let epoch = {
            let _guard = self.inner.lifecycle.lock().await;
            if self.connection_id() != Some(id) {
                debug!(connection_id = %id, "stale receive loop, connection already replaced");
                return;
            }
            // Read before teardown: a stop arriving while listeners run must
            // invalidate this restart.
            let epoch = self.inner.restart_epoch.load(Ordering::SeqCst);
            self.teardown_locked().await;
            epoch
        };
        self.schedule_restart(epoch);
    }

    fn restart_cancelled(&self, epoch: u64) -> bool {
        self.inner.restart_epoch.load(Ordering::SeqCst) != epoch
    }

    fn schedule_restart(&self, epoch: u64) {
        if self.restart_cancelled(epoch) {
            debug!("reconnect cancelled by stop");
            return;
        }
        let attempt = self
            .inner
            .reconnect_attempts
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1);
        let Some(delay) = self.inner.options.reconnect.delay_for(attempt) else {
            warn!(
                username = %self.inner.credentials.username(),
                attempt,
                "automatic reconnect disabled or exhausted, giving up"
            );
            return;
        };

        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        info!(attempt, delay_ms, "scheduling reconnect");

        // Hold the slot while spawning so the task cannot clear it before it
        // has been stored.
        let mut slot = lock(&self.inner.pending_restart);
        // `stop` bumps the epoch before it empties the slot.
        if self.restart_cancelled(epoch) {
            debug!("reconnect cancelled by stop");
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            drop(lock(&inner.pending_restart).take());
            SessionManager { inner }.restart(epoch).await;
        });
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    async fn restart(&self, epoch: u64) {
        let result = {
            let _guard = self.inner.lifecycle.lock().await;
            if self.restart_cancelled(epoch) {
                debug!("reconnect cancelled by stop");
                return;
            }
            if self.is_running() {
                return;
            }
            debug!(username = %self.inner.credentials.username(), "retrying connection");
            self.connect_locked().await
        };

        if let Err(e) = result {
            warn!(error = %e, "reconnect attempt failed");
            self.schedule_restart(epoch);
        }
    }

    // ── Inbound ────────────────────────────────────────────────

    fn on_chat(&self, chat: ChatEvent, dispatcher: &Dispatcher) {
        if chat.text.is_empty() {
            trace!(remote = %chat.remote, "ignoring chat without body");
            return;
        }

        let received_at = Utc::now();
        *lock(&self.inner.last_received) = Some(received_at);

        let from = Address::parse(&chat.remote);
        debug!(%from, "received chat");
        let message = InboundMessage {
            from,
            kind: chat.kind,
            body: chat.text,
            received_at,
        };

        // No subscribers is the common case.
        let _ = self.inner.inbound.send(message.clone());
        dispatcher.dispatch(self.listener(), message);
    }

    /// Receive every inbound message from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inner.inbound.subscribe()
    }

    /// Wait for the next inbound message.
    ///
    /// Only messages that arrive after the returned future is first polled
    /// count; use [`subscribe`](Self::subscribe) beforehand to avoid a gap.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] if nothing arrives within `timeout`.
    pub async fn next_message(&self, timeout: Duration) -> Result<InboundMessage, SessionError> {
        let mut rx = self.subscribe();
        let wait = async move {
            loop {
                match rx.recv().await {
                    Ok(message) => return Ok(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "message subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SessionError::SubscriptionClosed)
                    }
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(Err(SessionError::Timeout))
    }

    // ── Outbound ───────────────────────────────────────────────

    /// Send a chat message to `to`.
    ///
    /// `last_sent` records the attempt time, whether or not the provider
    /// accepts the message.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportUnavailable`] without touching any
    /// state when no connection exists, or [`SessionError::Transport`] with
    /// the provider's error.
    pub async fn send_message(&self, to: &str, body: &str) -> Result<(), SessionError> {
        let handle = read(&self.inner.connection)
            .as_ref()
            .map(|conn| Arc::clone(&conn.handle));
        let Some(handle) = handle else {
            return Err(SessionError::TransportUnavailable);
        };

        debug!(to, "sending chat");
        *lock(&self.inner.last_sent) = Some(Utc::now());
        handle
            .send(ChatEvent::chat(to, body))
            .await
            .map_err(SessionError::Transport)
    }

    // ── Listener and accessors ─────────────────────────────────

    /// Register the listener, replacing any previous one.
    pub fn set_listener(&self, listener: Arc<dyn SessionListener>) {
        *write(&self.inner.listener) = listener;
    }

    /// Remove the listener. Messages are then logged and discarded.
    pub fn clear_listener(&self) {
        self.set_listener(Arc::new(NoopListener));
    }

    fn listener(&self) -> Arc<dyn SessionListener> {
        Arc::clone(&read(&self.inner.listener))
    }

    /// Whether a session is currently up.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Time of the last send attempt.
    pub fn last_sent(&self) -> Option<DateTime<Utc>> {
        *lock(&self.inner.last_sent)
    }

    /// Time of the last accepted inbound message.
    pub fn last_received(&self) -> Option<DateTime<Utc>> {
        *lock(&self.inner.last_received)
    }

    /// Identifier of the current connection.
    pub fn connection_id(&self) -> Option<Uuid> {
        read(&self.inner.connection).as_ref().map(|conn| conn.id)
    }

    /// Posture the current connection was established with.
    pub fn connected_posture(&self) -> Option<SecurityPosture> {
        read(&self.inner.connection).as_ref().map(|conn| conn.posture)
    }

    /// Consecutive automatic restart attempts since the last good connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Snapshot of the session state.
    pub fn status(&self) -> SessionStatus {
        let (connection_id, posture) = read(&self.inner.connection)
            .as_ref()
            .map_or((None, None), |conn| (Some(conn.id), Some(conn.posture)));
        SessionStatus {
            username: self.inner.credentials.username().to_owned(),
            server: self.inner.credentials.server().to_owned(),
            running: self.is_running(),
            connection_id,
            posture,
            last_sent: self.last_sent(),
            last_received: self.last_received(),
            reconnect_attempts: self.reconnect_attempts(),
        }
    }
}

// ── Receive loop ───────────────────────────────────────────────

async fn receive_loop(
    inner: Weak<Inner>,
    id: Uuid,
    handle: Arc<dyn SessionHandle>,
    mut shutdown: watch::Receiver<bool>,
    mode: DispatchMode,
) {
    let dispatcher = Dispatcher::new(mode);
    debug!(connection_id = %id, ?mode, "receive loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let event = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            event = handle.recv() => event,
        };

        let Some(inner) = inner.upgrade() else {
            // Every manager is gone; nobody can stop this connection anymore.
            let _ = handle.close().await;
            break;
        };
        let manager = SessionManager { inner };

        match event {
            Err(e) => {
                manager.on_stream_failure(id, e).await;
                break;
            }
            Ok(ProviderEvent::Chat(chat)) => manager.on_chat(chat, &dispatcher),
            Ok(ProviderEvent::Presence(presence)) => {
                trace!(from = %presence.from, "ignoring presence");
            }
            Ok(ProviderEvent::Other(kind)) => {
                trace!(%kind, "ignoring event");
            }
        }
    }

    debug!(connection_id = %id, "receive loop exited");
}
