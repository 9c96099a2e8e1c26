//! Delivery of notifications to the listener.
//!
//! Each callback runs on its own Tokio task and the task's [`JoinError`] is
//! inspected, so a panicking listener is logged instead of unwinding into the
//! receive loop. Message delivery is either fire-and-forget per message
//! ([`DispatchMode::Concurrent`]) or funnelled through one worker per
//! connection that preserves receive order ([`DispatchMode::Ordered`]).
//!
//! [`JoinError`]: tokio::task::JoinError

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::listener::{InboundMessage, SessionListener};

/// How inbound messages are handed to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One task per message. No ordering guarantee between messages.
    #[default]
    Concurrent,
    /// A single worker delivers messages in receive order.
    Ordered,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concurrent" => Ok(Self::Concurrent),
            "ordered" => Ok(Self::Ordered),
            other => Err(format!("unknown dispatch mode: {other:?}")),
        }
    }
}

/// One listener callback.
#[derive(Debug, Clone)]
pub(crate) enum Notification {
    Connected,
    Disconnected,
    Message(InboundMessage),
}

impl Notification {
    fn label(&self) -> &'static str {
        match self {
            Self::Connected => "on_connected",
            Self::Disconnected => "on_disconnected",
            Self::Message(_) => "receive_message",
        }
    }
}

/// Run one callback on its own task and wait for it, containing panics.
pub(crate) async fn notify(listener: Arc<dyn SessionListener>, notification: Notification) {
    let callback = notification.label();
    let task = tokio::spawn(async move {
        match notification {
            Notification::Connected => listener.on_connected().await,
            Notification::Disconnected => listener.on_disconnected().await,
            Notification::Message(message) => listener.receive_message(message).await,
        }
    });

    match task.await {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!(callback, "listener panicked during dispatch"),
        Err(e) => warn!(callback, error = %e, "listener task cancelled"),
    }
}

type Job = (Arc<dyn SessionListener>, InboundMessage);

/// Per-connection message dispatcher.
///
/// Dropping the dispatcher lets an ordered worker drain what it already
/// queued and exit.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    ordered: Option<mpsc::UnboundedSender<Job>>,
}

impl Dispatcher {
    /// Create a dispatcher. Must be called inside a Tokio runtime.
    pub(crate) fn new(mode: DispatchMode) -> Self {
        let ordered = match mode {
            DispatchMode::Concurrent => None,
            DispatchMode::Ordered => {
                let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
                tokio::spawn(async move {
                    while let Some((listener, message)) = rx.recv().await {
                        notify(listener, Notification::Message(message)).await;
                    }
                    debug!("ordered dispatch worker finished");
                });
                Some(tx)
            }
        };
        Self { ordered }
    }

    /// Hand one message to the listener without waiting for it.
    pub(crate) fn dispatch(&self, listener: Arc<dyn SessionListener>, message: InboundMessage) {
        match &self.ordered {
            Some(tx) => {
                if tx.send((listener, message)).is_err() {
                    warn!("ordered dispatch worker gone, dropping message");
                }
            }
            None => {
                tokio::spawn(notify(listener, Notification::Message(message)));
            }
        }
    }
}
