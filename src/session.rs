//! Streaming session: one request/response exchange at a time.
//!
//! DESIGN
//! ======
//! `StreamState` is the pure transition table: it takes one dispatched
//! envelope and returns the observer notifications it implies. `Session`
//! registers that table with the hub, sends outbound envelopes and calls the
//! observer after the state lock is released, so observers may call back into
//! the session.
//!
//! ```text
//!   Idle --queued--> Queued --started--> Active --token--> Active
//!     \______________started_____________^   |
//!   Idle <-------------------ended-----------+
//!   any  --cancel()--> Idle
//! ```
//!
//! Cancellation is advisory: the remote may already have tokens in flight, or
//! may answer a cancel with nothing running by reporting an error. After a
//! local cancel the session drains, ignoring the cancelled exchange's traffic
//! and that error until the remote ends it or answers the next request.
//!
//! A remote error answers the outstanding request. It ends a queued exchange
//! but leaves a running stream alone.
//!
//! The remote owns stream boundaries, so sequencing anomalies are logged and
//! applied rather than rejected.

use std::sync::{Arc, Mutex};

use envelope::{Envelope, MessageKind};
use tracing::{debug, warn};

use crate::connection::ConnectionState;
use crate::hub::{ErrorListener, Hub, MessageListener};
use crate::lock;
use crate::transport::TransportError;

/// Placement of the session in the response lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    /// No response in flight.
    #[default]
    Idle,
    /// Request accepted, waiting for the model.
    Queued,
    /// Tokens arriving.
    Active,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("a response is already pending ({0:?})")]
    Busy(Phase),
    #[error("not connected")]
    Disconnected,
}

/// Receives the high-level stream callbacks. Every method defaults to a no-op.
pub trait SessionObserver: Send + Sync {
    fn on_queued(&self) {}

    fn on_started(&self) {}

    /// One incremental fragment, not the accumulation.
    fn on_token(&self, _fragment: &str) {}

    fn on_ended(&self, _final_text: &str) {}

    /// The remote reported an error. A running stream continues.
    fn on_error(&self, _message: &str) {}

    /// The exchange in flight ended without a response: the remote rejected
    /// the request or the connection dropped. Defaults to [`on_error`](Self::on_error).
    fn on_aborted(&self, reason: &str) {
        self.on_error(reason);
    }
}

// =============================================================================
// TRANSITION TABLE
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
enum Notice {
    Queued,
    Started,
    Token(String),
    Ended(String),
    Failed(String),
    Aborted(String),
}

#[derive(Debug, Default)]
struct StreamState {
    phase: Phase,
    text: String,
    /// A request was sent and the remote has not answered it yet.
    requested: bool,
    /// A cancelled exchange may still be delivering traffic.
    draining: bool,
}

impl StreamState {
    fn apply(&mut self, envelope: &Envelope) -> Vec<Notice> {
        match envelope.kind() {
            MessageKind::StreamQueued => self.queued(),
            MessageKind::StreamStarted => self.started(),
            MessageKind::StreamToken => self.token(envelope.content().unwrap_or_default()),
            MessageKind::StreamEnded => self.ended(),
            MessageKind::StreamError => self.failed(envelope.content().unwrap_or_default()),
            kind => {
                debug!(?kind, "session: ignoring message");
                Vec::new()
            }
        }
    }

    /// Queued or started for the cancelled exchange rather than a new request.
    fn is_stale_opening(&self) -> bool {
        self.draining && !self.requested
    }

    fn queued(&mut self) -> Vec<Notice> {
        if self.is_stale_opening() {
            debug!("session: ignoring queued for cancelled exchange");
            return Vec::new();
        }
        self.draining = false;
        self.requested = false;

        match self.phase {
            Phase::Idle => {}
            Phase::Queued => {
                debug!("session: duplicate queued");
                return Vec::new();
            }
            Phase::Active => {
                warn!(discarded = self.text.len(), "session: queued while streaming, discarding partial text");
                self.text.clear();
            }
        }
        self.phase = Phase::Queued;
        vec![Notice::Queued]
    }

    fn started(&mut self) -> Vec<Notice> {
        if self.is_stale_opening() {
            debug!("session: ignoring start for cancelled exchange");
            return Vec::new();
        }
        self.draining = false;
        self.requested = false;

        if self.phase == Phase::Active {
            warn!("session: start while streaming, restarting");
        }
        self.phase = Phase::Active;
        self.text.clear();
        vec![Notice::Started]
    }

    fn token(&mut self, fragment: &str) -> Vec<Notice> {
        if self.draining {
            debug!("session: ignoring token for cancelled exchange");
            return Vec::new();
        }

        let mut notices = Vec::with_capacity(2);
        if self.phase != Phase::Active {
            warn!(phase = ?self.phase, "session: token without start, opening implicit stream");
            self.phase = Phase::Active;
            self.requested = false;
            self.text.clear();
            notices.push(Notice::Started);
        }
        self.text.push_str(fragment);
        notices.push(Notice::Token(fragment.to_owned()));
        notices
    }

    fn ended(&mut self) -> Vec<Notice> {
        if self.draining {
            debug!("session: cancelled exchange ended");
            self.draining = false;
            return Vec::new();
        }

        match self.phase {
            Phase::Idle => {
                warn!("session: end without stream, ignoring");
                Vec::new()
            }
            Phase::Queued | Phase::Active => {
                if self.phase == Phase::Queued {
                    warn!("session: end while queued");
                }
                self.phase = Phase::Idle;
                vec![Notice::Ended(std::mem::take(&mut self.text))]
            }
        }
    }

    fn failed(&mut self, reason: &str) -> Vec<Notice> {
        if self.is_stale_opening() {
            debug!(reason, "session: ignoring error for cancelled exchange");
            self.draining = false;
            return Vec::new();
        }
        let answered = std::mem::take(&mut self.requested);

        match self.phase {
            Phase::Active => vec![Notice::Failed(reason.to_owned())],
            Phase::Queued => {
                self.phase = Phase::Idle;
                self.text.clear();
                vec![Notice::Aborted(reason.to_owned())]
            }
            Phase::Idle if answered => vec![Notice::Aborted(reason.to_owned())],
            Phase::Idle => vec![Notice::Failed(reason.to_owned())],
        }
    }

    fn begin_request(&mut self, prompt: &str) -> Result<(), SessionError> {
        if prompt.trim().is_empty() {
            return Err(SessionError::EmptyPrompt);
        }
        if self.phase != Phase::Idle || self.requested {
            return Err(SessionError::Busy(self.phase));
        }
        self.requested = true;
        Ok(())
    }

    /// The remote may answer by ending the stream, or with an error when
    /// nothing was running. Either reply is drained.
    fn cancel(&mut self) {
        self.draining = true;
        self.phase = Phase::Idle;
        self.requested = false;
        self.text.clear();
    }

    /// The socket died; whatever was in flight is gone with it.
    fn abandon(&mut self, error: &TransportError) -> Vec<Notice> {
        let in_flight = self.phase != Phase::Idle || self.requested;
        self.phase = Phase::Idle;
        self.requested = false;
        self.draining = false;
        self.text.clear();

        if in_flight {
            warn!(%error, "session: connection lost mid-stream");
            vec![Notice::Aborted(error.to_string())]
        } else {
            Vec::new()
        }
    }
}

fn notify(observer: &dyn SessionObserver, notices: Vec<Notice>) {
    for notice in notices {
        match notice {
            Notice::Queued => observer.on_queued(),
            Notice::Started => observer.on_started(),
            Notice::Token(fragment) => observer.on_token(&fragment),
            Notice::Ended(text) => observer.on_ended(&text),
            Notice::Failed(message) => observer.on_error(&message),
            Notice::Aborted(reason) => observer.on_aborted(&reason),
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// A conversation endpoint registered with the hub. Unsubscribes on drop.
pub struct Session {
    hub: Hub,
    state: Arc<Mutex<StreamState>>,
    on_message: MessageListener,
    on_error: ErrorListener,
}

impl Session {
    /// Subscribe a new idle session to `hub`, reporting to `observer`.
    #[must_use]
    pub fn attach(hub: &Hub, observer: Arc<dyn SessionObserver>) -> Self {
        let state = Arc::new(Mutex::new(StreamState::default()));

        let on_message: MessageListener = {
            let state = Arc::clone(&state);
            let observer = Arc::clone(&observer);
            Arc::new(move |envelope: &Envelope| {
                let notices = lock(&state).apply(envelope);
                notify(observer.as_ref(), notices);
            })
        };
        let on_error: ErrorListener = {
            let state = Arc::clone(&state);
            Arc::new(move |error: &TransportError| {
                let notices = lock(&state).abandon(error);
                notify(observer.as_ref(), notices);
            })
        };

        hub.add_message_listener(&on_message);
        hub.add_error_listener(&on_error);

        Self { hub: hub.clone(), state, on_message, on_error }
    }

    /// Send `prompt` as a completion request.
    ///
    /// The phase does not change until the remote answers with queued or started.
    ///
    /// # Errors
    ///
    /// [`SessionError::EmptyPrompt`] for blank text, [`SessionError::Busy`] while a
    /// response is pending, [`SessionError::Disconnected`] when the socket is not open.
    pub fn request(&self, prompt: &str) -> Result<(), SessionError> {
        if self.hub.state() != ConnectionState::Open {
            return Err(SessionError::Disconnected);
        }
        lock(&self.state).begin_request(prompt)?;
        self.hub.send(envelope::encode(&Envelope::completion_request(prompt)));
        Ok(())
    }

    /// Tell the remote to stop and return to `Idle` immediately.
    pub fn cancel(&self) {
        lock(&self.state).cancel();
        self.hub.send(envelope::encode(&Envelope::cancel()));
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        lock(&self.state).phase
    }

    /// Text received so far in the active stream.
    #[must_use]
    pub fn accumulated_text(&self) -> String {
        lock(&self.state).text.clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.hub.remove_message_listener(&self.on_message);
        self.hub.remove_error_listener(&self.on_error);
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
