//! Connection manager: one logical socket that survives transport drops.
//!
//! DESIGN
//! ======
//! `ConnectionManager` is a handle; the socket itself is owned by a single
//! driver task. Handles talk to the driver over a command channel and the
//! driver reports lifecycle upward as an ordered [`ConnectionEvent`] stream.
//! Only the driver ever touches the link, so there is never more than one
//! socket and no lock around it.
//!
//! LIFECYCLE
//! =========
//! ```text
//!   Closed --start--> Connecting --ok--> Open
//!                        |  ^              |
//!                 error  v  | retry timer  | close / error
//!                     Reconnecting <-------+
//! ```
//! `stop` from any state closes the link and returns to `Closed`. Sends are
//! written only while `Open` and dropped otherwise; nothing is queued.
//!
//! Every open attempt gets a new generation number. Events and tagged sends
//! carry it, so work armed against one socket can never land on the next.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::transport::{Link, Transport, TransportError};

// =============================================================================
// STATE & EVENTS
// =============================================================================

/// Lifecycle state of the managed connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Lifecycle and traffic reported by the driver, in wire order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A socket opened.
    Opened { generation: u64 },
    /// Raw text read from the socket.
    Message { generation: u64, text: String },
    /// The attempt or socket ended unexpectedly; a reconnect is scheduled.
    Closed { generation: u64, error: TransportError },
    /// The socket was closed by `stop`.
    Stopped { generation: u64 },
}

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    Send(String),
    /// Send only if `generation` is still the open socket.
    SendOn { generation: u64, raw: String },
}

// =============================================================================
// HANDLE
// =============================================================================

/// Handle to the connection driver. Dropping it shuts the driver down.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Spawn the driver task. Nothing connects until [`start`](Self::start).
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(config: &ChannelConfig, transport: Arc<dyn Transport>) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Closed);

        let driver = Driver {
            endpoint: config.endpoint.clone(),
            retry: config.reconnect_interval,
            transport,
            commands: command_rx,
            events,
            state: state_tx,
            generation: 0,
        };
        tokio::spawn(driver.run());

        (Self { commands, state }, event_rx)
    }

    /// Begin connecting. No-op while `Open` or `Connecting`.
    pub fn start(&self) {
        let _ = self.commands.send(Command::Start);
    }

    /// Close the socket and stop reconnecting.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// Write `raw` if the connection is open; otherwise it is dropped.
    pub fn send(&self, raw: impl Into<String>) {
        let _ = self.commands.send(Command::Send(raw.into()));
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Weak sender for generation-tagged writes. Does not keep the driver alive.
    pub(crate) fn pinger(&self) -> Pinger {
        Pinger { commands: self.commands.downgrade() }
    }
}

/// Generation-tagged writer used by the keepalive monitor.
pub(crate) struct Pinger {
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Pinger {
    /// Write `raw` only if socket `generation` is still the open one.
    pub(crate) fn send_on(&self, generation: u64, raw: String) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::SendOn { generation, raw });
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

enum Next {
    Idle,
    Connect,
    Retry,
    Shutdown,
}

struct Driver {
    endpoint: String,
    retry: Duration,
    transport: Arc<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
    generation: u64,
}

impl Driver {
    async fn run(mut self) {
        let mut next = Next::Idle;
        loop {
            next = match next {
                Next::Idle => self.idle().await,
                Next::Connect => self.connect().await,
                Next::Retry => self.wait_retry().await,
                Next::Shutdown => break,
            };
        }
        self.set_state(ConnectionState::Closed);
        debug!(endpoint = %self.endpoint, "ws: driver stopped");
    }

    /// `Closed`: wait for `start`.
    async fn idle(&mut self) -> Next {
        self.set_state(ConnectionState::Closed);
        loop {
            match self.commands.recv().await {
                Some(Command::Start) => return Next::Connect,
                Some(Command::Stop) => {}
                Some(Command::Send(_) | Command::SendOn { .. }) => {
                    debug!("ws: dropping send while closed");
                }
                None => return Next::Shutdown,
            }
        }
    }

    /// `Connecting`: one open attempt, abandoned on `stop`.
    async fn connect(&mut self) -> Next {
        self.generation += 1;
        let generation = self.generation;
        self.set_state(ConnectionState::Connecting);

        let transport = Arc::clone(&self.transport);
        let endpoint = self.endpoint.clone();
        let open = async move { transport.open(&endpoint).await };
        tokio::pin!(open);

        loop {
            tokio::select! {
                result = &mut open => {
                    return match result {
                        Ok(link) => self.serve(link).await,
                        Err(error) => {
                            warn!(endpoint = %self.endpoint, generation, %error, "ws: connect failed");
                            self.emit(ConnectionEvent::Closed { generation, error });
                            Next::Retry
                        }
                    };
                }
                command = self.commands.recv() => match command {
                    Some(Command::Start) => {}
                    Some(Command::Stop) => {
                        info!(generation, "ws: connect abandoned by stop");
                        self.emit(ConnectionEvent::Stopped { generation });
                        return Next::Idle;
                    }
                    Some(Command::Send(_) | Command::SendOn { .. }) => {
                        debug!("ws: dropping send while connecting");
                    }
                    None => return Next::Shutdown,
                },
            }
        }
    }

    /// `Open`: relay traffic until the link ends or `stop` arrives.
    async fn serve(&mut self, mut link: Link) -> Next {
        let generation = self.generation;
        self.set_state(ConnectionState::Open);
        info!(endpoint = %self.endpoint, generation, "ws: connected");
        self.emit(ConnectionEvent::Opened { generation });

        let next = loop {
            tokio::select! {
                inbound = link.recv() => match inbound {
                    Some(Ok(text)) => self.emit(ConnectionEvent::Message { generation, text }),
                    Some(Err(error)) => {
                        warn!(generation, %error, "ws: connection failed");
                        self.emit(ConnectionEvent::Closed { generation, error });
                        break Next::Retry;
                    }
                    None => {
                        info!(generation, "ws: connection closed by peer");
                        self.emit(ConnectionEvent::Closed { generation, error: TransportError::Closed });
                        break Next::Retry;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(raw)) => {
                        if !link.send(raw) {
                            debug!(generation, "ws: socket gone, send dropped");
                        }
                    }
                    Some(Command::SendOn { generation: target, raw }) => {
                        if target == generation {
                            if !link.send(raw) {
                                debug!(generation, "ws: socket gone, send dropped");
                            }
                        } else {
                            debug!(generation, target, "ws: dropping send for stale connection");
                        }
                    }
                    Some(Command::Start) => {}
                    Some(Command::Stop) => {
                        info!(generation, "ws: closing on stop");
                        self.emit(ConnectionEvent::Stopped { generation });
                        break Next::Idle;
                    }
                    None => break Next::Shutdown,
                },
            }
        };

        link.retire(self.retry).await;
        next
    }

    /// `Reconnecting`: wait one retry period, then try again.
    async fn wait_retry(&mut self) -> Next {
        self.set_state(ConnectionState::Reconnecting);
        let timer = tokio::time::sleep(self.retry);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                () = &mut timer => return Next::Connect,
                command = self.commands.recv() => match command {
                    Some(Command::Start) => return Next::Connect,
                    Some(Command::Stop) => return Next::Idle,
                    Some(Command::Send(_) | Command::SendOn { .. }) => {
                        debug!("ws: dropping send while reconnecting");
                    }
                    None => return Next::Shutdown,
                },
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "ws: state changed");
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
