//! Consumer-facing callback capability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::address::Address;
use crate::provider::ChatKind;

/// A chat message delivered to the listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundMessage {
    /// Sender, split into bare identity and resource.
    pub from: Address,
    /// Message type tag.
    pub kind: ChatKind,
    /// Non-empty text body.
    pub body: String,
    /// When the receive loop accepted the message.
    pub received_at: DateTime<Utc>,
}

/// Receives session notifications.
///
/// Every method defaults to a no-op, so implementors override only what they
/// need. Callbacks run on their own Tokio tasks; a panic inside one is logged
/// and does not affect the session.
///
/// `on_connected` and `on_disconnected` are awaited while the manager holds
/// its start/stop lock, so they must not call [`SessionManager::start`] or
/// [`SessionManager::stop`]; doing so deadlocks. Spawn a task if a callback
/// needs to drive the lifecycle. `receive_message` has no such restriction.
///
/// [`SessionManager::start`]: super::SessionManager::start
/// [`SessionManager::stop`]: super::SessionManager::stop
#[async_trait]
pub trait SessionListener: Send + Sync {
    /// A chat message arrived.
    async fn receive_message(&self, message: InboundMessage) {
        let _ = message;
    }

    /// The session connected. Always precedes message delivery for that
    /// connection.
    async fn on_connected(&self) {}

    /// The session was torn down.
    async fn on_disconnected(&self) {}
}

/// Listener used while none is registered. Logs and discards messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

#[async_trait]
impl SessionListener for NoopListener {
    async fn receive_message(&self, message: InboundMessage) {
        debug!(from = %message.from, body = %message.body, "no listener registered, discarding message");
    }
}
