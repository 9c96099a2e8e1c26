//! Chatline: a presence-oriented chat session client.
//!
//! Keeps one account's session to a messaging server alive: connects with a
//! degrading security fallback ladder, hands inbound chat to a listener on
//! background tasks, and restarts the session with backoff when the stream
//! drops. The wire protocol itself sits behind [`provider::ProtocolProvider`].
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod config;
pub mod credentials;
pub mod logging;
pub mod provider;
pub mod session;

pub use session::{SessionError, SessionListener, SessionManager};
