//! Subscriber hub: one connection, many listeners.
//!
//! DESIGN
//! ======
//! `Hub` owns the only `ConnectionManager` and wires the pipeline:
//!
//! ```text
//! driver --ConnectionEvent--> keepalive --Delivery--> dispatch --> listeners
//! ```
//!
//! Listeners are `Arc` callbacks and membership is by pointer identity, so
//! adding the same `Arc` twice is a no-op and removing an unknown one is
//! harmless. Dispatch clones the listener list before each delivery and calls
//! listeners without holding the lock; a listener may add or remove listeners
//! (itself included) from inside its callback. A listener removed mid-dispatch
//! may still see that one message, never a later one.
//!
//! Dropping every `Hub` clone closes the command channel, and the driver,
//! keepalive and dispatch tasks exit in turn.

use std::sync::{Arc, Mutex};

use envelope::Envelope;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::config::ChannelConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::keepalive::{Delivery, KeepaliveMonitor};
use crate::lock;
use crate::transport::{Transport, TransportError, WsTransport};

/// Callback for every application message.
pub type MessageListener = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Callback for every transport failure.
pub type ErrorListener = Arc<dyn Fn(&TransportError) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    messages: Vec<MessageListener>,
    errors: Vec<ErrorListener>,
}

/// Shared access point to the completions channel. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    connection: Arc<ConnectionManager>,
    listeners: Arc<Mutex<Listeners>>,
}

impl Hub {
    /// Build the pipeline over `transport`. Call [`start`](Self::start) to connect.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: &ChannelConfig, transport: Arc<dyn Transport>) -> Self {
        let (connection, events) = ConnectionManager::spawn(config, transport);
        let deliveries = KeepaliveMonitor::spawn(events, connection.pinger(), config.ping_interval);
        let listeners = Arc::new(Mutex::new(Listeners::default()));
        tokio::spawn(dispatch(deliveries, Arc::clone(&listeners)));

        Self { connection: Arc::new(connection), listeners }
    }

    /// Hub over a real websocket.
    #[must_use]
    pub fn connect(config: &ChannelConfig) -> Self {
        Self::new(config, Arc::new(WsTransport))
    }

    pub fn start(&self) {
        self.connection.start();
    }

    pub fn stop(&self) {
        self.connection.stop();
    }

    /// Forward `raw` to the socket. Dropped unless the connection is open.
    pub fn send(&self, raw: impl Into<String>) {
        self.connection.send(raw);
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch()
    }

    /// Register `listener`. Returns `false` if it was already registered.
    pub fn add_message_listener(&self, listener: &MessageListener) -> bool {
        insert(&mut lock(&self.listeners).messages, listener)
    }

    /// Unregister `listener`. Returns `false` if it was not registered.
    pub fn remove_message_listener(&self, listener: &MessageListener) -> bool {
        remove(&mut lock(&self.listeners).messages, listener)
    }

    /// Register `listener`. Returns `false` if it was already registered.
    pub fn add_error_listener(&self, listener: &ErrorListener) -> bool {
        insert(&mut lock(&self.listeners).errors, listener)
    }

    /// Unregister `listener`. Returns `false` if it was not registered.
    pub fn remove_error_listener(&self, listener: &ErrorListener) -> bool {
        remove(&mut lock(&self.listeners).errors, listener)
    }
}

fn insert<T: ?Sized>(set: &mut Vec<Arc<T>>, listener: &Arc<T>) -> bool {
    if set.iter().any(|l| Arc::ptr_eq(l, listener)) {
        return false;
    }
    set.push(Arc::clone(listener));
    true
}

fn remove<T: ?Sized>(set: &mut Vec<Arc<T>>, listener: &Arc<T>) -> bool {
    let before = set.len();
    set.retain(|l| !Arc::ptr_eq(l, listener));
    set.len() != before
}

async fn dispatch(mut deliveries: mpsc::UnboundedReceiver<Delivery>, listeners: Arc<Mutex<Listeners>>) {
    while let Some(delivery) = deliveries.recv().await {
        match delivery {
            Delivery::Message(envelope) => {
                let snapshot = lock(&listeners).messages.clone();
                debug!(kind = ?envelope.kind(), listeners = snapshot.len(), "hub: dispatch");
                for listener in &snapshot {
                    listener(&envelope);
                }
            }
            Delivery::Error(error) => {
                let snapshot = lock(&listeners).errors.clone();
                debug!(%error, listeners = snapshot.len(), "hub: dispatch error");
                for listener in &snapshot {
                    listener(&error);
                }
            }
        }
    }
    debug!("hub: dispatch ended");
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
