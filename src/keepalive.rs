//! Keepalive monitor: ping/pong heartbeat hidden from subscribers.
//!
//! DESIGN
//! ======
//! Sits between the connection driver's event stream and the hub. It pings as
//! soon as a socket opens and again one interval after every pong. There is a
//! single timer; a pong always resets it. Missing pongs are not acted on here:
//! a dead socket is noticed by the driver as a close or error.
//!
//! Inbound text is decoded here. Pongs are consumed, undecodable text is
//! logged and dropped, everything else is forwarded in arrival order. Pings
//! are tagged with the socket generation that armed them, so a timer that
//! outlives its socket cannot write to the next one.

use std::time::Duration;

use envelope::{Direction, Envelope, MessageKind};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connection::{ConnectionEvent, Pinger};
use crate::transport::TransportError;

/// What the monitor hands to the hub.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Message(Envelope),
    Error(TransportError),
}

pub(crate) struct KeepaliveMonitor {
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    pinger: Pinger,
    deliveries: mpsc::UnboundedSender<Delivery>,
    interval: Duration,
    /// Generation of the open socket, if any.
    current: Option<u64>,
}

impl KeepaliveMonitor {
    /// Spawn the monitor over `events`. The returned stream ends when `events` does.
    pub(crate) fn spawn(
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
        pinger: Pinger,
        interval: Duration,
    ) -> mpsc::UnboundedReceiver<Delivery> {
        let (deliveries, rx) = mpsc::unbounded_channel();
        let monitor = Self { events, pinger, deliveries, interval, current: None };
        tokio::spawn(monitor.run());
        rx
    }

    async fn run(mut self) {
        let timer = tokio::time::sleep(self.interval);
        tokio::pin!(timer);
        let mut armed = false;

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        ConnectionEvent::Opened { generation } => {
                            self.current = Some(generation);
                            armed = false;
                            self.ping(generation);
                        }
                        ConnectionEvent::Message { generation, text } => {
                            if self.current != Some(generation) {
                                debug!(generation, "keepalive: dropping message from stale connection");
                                continue;
                            }
                            match envelope::decode(Direction::Inbound, &text) {
                                Ok(envelope) if envelope.kind() == MessageKind::Pong => {
                                    timer.as_mut().reset(Instant::now() + self.interval);
                                    armed = true;
                                }
                                Ok(envelope) => self.forward(Delivery::Message(envelope)),
                                Err(error) => {
                                    warn!(generation, %error, "keepalive: dropping undecodable message");
                                }
                            }
                        }
                        ConnectionEvent::Closed { generation, error } => {
                            debug!(generation, "keepalive: connection lost, timer disarmed");
                            self.current = None;
                            armed = false;
                            self.forward(Delivery::Error(error));
                        }
                        ConnectionEvent::Stopped { .. } => {
                            self.current = None;
                            armed = false;
                        }
                    }
                }
                () = &mut timer, if armed => {
                    armed = false;
                    if let Some(generation) = self.current {
                        self.ping(generation);
                    }
                }
            }
        }
        debug!("keepalive: event stream ended");
    }

    fn ping(&self, generation: u64) {
        self.pinger.send_on(generation, envelope::encode(&Envelope::ping()));
    }

    fn forward(&self, delivery: Delivery) {
        let _ = self.deliveries.send(delivery);
    }
}

#[cfg(test)]
#[path = "keepalive_test.rs"]
mod tests;
