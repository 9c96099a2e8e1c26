//! Protocol provider abstraction layer.
//!
//! Defines the [`ProtocolProvider`] and [`SessionHandle`] traits that wrap the
//! underlying messaging protocol library, and the shared event types that flow
//! across them. Framing, authentication and stanza parsing live behind this
//! seam; the session manager only sees connect/send/receive/close.
//!
//! One provider ships with the crate:
//! - [`loopback::LoopbackProvider`]: in-process server for tests and demos

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::posture::SecurityPosture;

pub mod loopback;

// ── Connect options ────────────────────────────────────────────

/// Initial presence availability announced when the session is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Available (no `show` value).
    Online,
    /// Free to chat.
    Chat,
    /// Temporarily away.
    Away,
    /// Extended away.
    #[default]
    #[serde(rename = "xa")]
    ExtendedAway,
    /// Do not disturb.
    Dnd,
}

impl PresenceStatus {
    /// Wire token for the presence `show` value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "",
            Self::Chat => "chat",
            Self::Away => "away",
            Self::ExtendedAway => "xa",
            Self::Dnd => "dnd",
        }
    }
}

/// Everything a provider needs to open one session.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Server address (`host` or `host:port`).
    pub host: String,
    /// Account username.
    pub username: String,
    /// Account password.
    pub password: String,
    /// Security posture for this attempt.
    pub posture: SecurityPosture,
    /// Request presence/session establishment after authentication.
    pub establish_session: bool,
    /// Initial presence status.
    pub status: PresenceStatus,
    /// Initial presence status message.
    pub status_message: String,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("posture", &self.posture)
            .field("establish_session", &self.establish_session)
            .field("status", &self.status)
            .field("status_message", &self.status_message)
            .finish()
    }
}

// ── Events ─────────────────────────────────────────────────────

/// Message type tag carried by chat traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// One-to-one chat.
    #[default]
    Chat,
    /// Standalone message outside a conversation.
    Normal,
    /// Multi-user room traffic.
    Groupchat,
    /// Broadcast headline.
    Headline,
    /// Error reply.
    Error,
}

/// A unit of chat traffic, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Remote address, `node/resource` for inbound traffic.
    pub remote: String,
    /// Message type tag.
    pub kind: ChatKind,
    /// Text body.
    pub text: String,
}

impl ChatEvent {
    /// Build a `chat`-typed event.
    pub fn chat(remote: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            kind: ChatKind::Chat,
            text: text.into(),
        }
    }
}

/// Presence notification. Opaque to the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    /// Address the presence originated from.
    pub from: String,
    /// Presence `show` token, if any.
    pub show: Option<String>,
}

/// One item yielded by [`SessionHandle::recv`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Chat traffic.
    Chat(ChatEvent),
    /// Presence traffic.
    Presence(PresenceEvent),
    /// Anything else the provider surfaces (IQ, stream features, ...).
    Other(String),
}

// ── Errors ─────────────────────────────────────────────────────

/// Errors returned by protocol providers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Session could not be established with the requested options.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The inbound stream terminated.
    #[error("stream terminated: {0}")]
    Stream(String),
    /// Outbound transmit failed.
    #[error("send failed: {0}")]
    Send(String),
    /// The handle has already been closed.
    #[error("session handle closed")]
    Closed,
}

// ── Traits ─────────────────────────────────────────────────────

/// An established connection to the messaging server.
///
/// Handles are shared between the receive loop and senders, so every method
/// takes `&self`. `close` is not required to be idempotent.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Wait for the next inbound event.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the stream terminates; the handle is
    /// unusable afterwards.
    async fn recv(&self) -> Result<ProviderEvent, ProviderError>;

    /// Transmit one chat event.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transmit failure.
    async fn send(&self, chat: ChatEvent) -> Result<(), ProviderError>;

    /// Close the underlying transport.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Closed`] (or another error) when the handle
    /// was already closed.
    async fn close(&self) -> Result<(), ProviderError>;
}

/// Factory for [`SessionHandle`]s.
///
/// All provider implementations must be `Send + Sync` so the session manager
/// can reconnect from a background task.
#[async_trait]
pub trait ProtocolProvider: Send + Sync {
    /// Open a new session with the given options.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on any failure. The session manager does not
    /// distinguish error kinds during the fallback ladder.
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn SessionHandle>, ProviderError>;
}
