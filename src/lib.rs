//! Client side of the realtime completions channel.
//!
//! A [`Hub`] holds one websocket to the completions endpoint, keeps it alive
//! with ping/pong, reconnects on loss, and fans decoded messages out to
//! listeners. A [`Session`] is one such listener: it sends prompts and turns
//! the streamed response into [`SessionObserver`] callbacks. A [`Transcript`]
//! is an observer that keeps the conversation as a read model.
//!
//! ```text
//! Session / Transcript
//!        │  listeners
//!       Hub ── keepalive ── ConnectionManager ── Transport (websocket)
//! ```

pub mod config;
pub mod connection;
pub mod hub;
mod keepalive;
pub mod session;
pub mod transcript;
pub mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::{ChannelConfig, ConfigError};
pub use connection::{ConnectionManager, ConnectionState};
pub use envelope;
pub use hub::{ErrorListener, Hub, MessageListener};
pub use session::{Phase, Session, SessionError, SessionObserver};
pub use transcript::{ChatMessage, Role, Transcript, TranscriptView};
pub use transport::{Transport, TransportError, WsTransport};

/// Lock `mutex`, recovering the guard if a listener panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
