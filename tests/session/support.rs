//! Shared fixtures for session tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use chatline::credentials::Credentials;
use chatline::provider::loopback::LoopbackProvider;
use chatline::session::{InboundMessage, SessionListener, SessionManager, SessionOptions};

/// One listener callback, as observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Connected,
    Disconnected,
    Message(InboundMessage),
}

/// Listener that records every callback and can be told to panic.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Recorded>>,
    panic_on: Option<String>,
    delay: Option<Duration>,
    disconnect_delay: Option<Duration>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Panics when a message with exactly this body arrives.
    pub fn panicking_on(body: &str) -> Arc<Self> {
        Arc::new(Self {
            panic_on: Some(body.to_owned()),
            ..Self::default()
        })
    }

    /// Sleeps inside `receive_message` before recording.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// Sleeps inside `on_disconnected` before recording.
    pub fn slow_to_disconnect(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            disconnect_delay: Some(delay),
            ..Self::default()
        })
    }

    fn push(&self, event: Recorded) {
        self.events.lock().expect("listener lock").push(event);
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().expect("listener lock").clone()
    }

    pub fn messages(&self) -> Vec<InboundMessage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Message(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.body).collect()
    }

    pub fn connected_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Recorded::Connected))
            .count()
    }

    pub fn disconnected_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Recorded::Disconnected))
            .count()
    }
}

#[async_trait]
impl SessionListener for RecordingListener {
    async fn receive_message(&self, message: InboundMessage) {
        if self.panic_on.as_deref() == Some(message.body.as_str()) {
            panic!("listener exploded on {:?}", message.body);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.push(Recorded::Message(message));
    }

    async fn on_connected(&self) {
        self.push(Recorded::Connected);
    }

    async fn on_disconnected(&self) {
        if let Some(delay) = self.disconnect_delay {
            tokio::time::sleep(delay).await;
        }
        self.push(Recorded::Disconnected);
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("chat.example.com", "me@example.com", "hunter2")
}

pub fn manager(provider: &LoopbackProvider) -> SessionManager {
    manager_with(provider, SessionOptions::default())
}

pub fn manager_with(provider: &LoopbackProvider, options: SessionOptions) -> SessionManager {
    SessionManager::with_options(credentials(), Arc::new(provider.clone()), options)
}

/// Poll `cond` every 10 ms for up to 20 s (virtual time when paused).
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..2000 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
