//! Socket seam between the connection manager and the network.
//!
//! DESIGN
//! ======
//! A [`Transport`] opens one [`Link`] per connection attempt. A link is a
//! pair of channels: text written by the client and text (or a terminal
//! error) read from the peer. The inbound channel ending means the socket is
//! gone. Channel-shaped links keep the connection manager independent of the
//! socket library and let tests inject faults without a network.
//!
//! `WsTransport` bridges a `tokio-tungstenite` stream to a link with one pump
//! task per socket. The pump exits when the client drops its side of the link,
//! so retiring a link also closes the socket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Transport-level failure. Always recoverable by reconnecting.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The open socket failed while reading or writing.
    #[error("socket error: {0}")]
    Socket(String),
    /// The peer closed the socket.
    #[error("connection closed")]
    Closed,
}

/// Inbound item on a link: one text message, or the error that ended it.
pub type Inbound = Result<String, TransportError>;

/// One open socket, seen as channels.
pub struct Link {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    worker: Option<JoinHandle<()>>,
}

impl Link {
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<String>, inbound: mpsc::UnboundedReceiver<Inbound>) -> Self {
        Self { outbound, inbound, worker: None }
    }

    /// Attach the task that owns the underlying socket. Retiring the link waits for it.
    #[must_use]
    pub fn with_worker(mut self, worker: JoinHandle<()>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Queue text for the socket. Returns `false` if the socket is already gone.
    pub(crate) fn send(&self, raw: String) -> bool {
        self.outbound.send(raw).is_ok()
    }

    /// Next inbound item; `None` once the socket is closed.
    pub(crate) async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    /// Drop both channel ends and wait (at most `grace`) for the socket task to finish.
    pub(crate) async fn retire(self, grace: Duration) {
        let Self { outbound, inbound, worker } = self;
        drop(outbound);
        drop(inbound);

        let Some(worker) = worker else {
            return;
        };
        let abort = worker.abort_handle();
        if tokio::time::timeout(grace, worker).await.is_err() {
            warn!(grace_ms = grace.as_millis(), "ws: socket task did not finish, aborting");
            abort.abort();
        }
    }
}

/// Opens links to an endpoint.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a new socket to `endpoint`.
    async fn open(&self, endpoint: &str) -> Result<Link, TransportError>;
}

/// Production transport over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn open(&self, endpoint: &str) -> Result<Link, TransportError> {
        let (stream, _) = connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(pump(stream, out_rx, in_tx));

        Ok(Link::new(out_tx, in_rx).with_worker(worker))
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Move text between the socket and the link until either side ends.
async fn pump(stream: WsStream, mut outbound: mpsc::UnboundedReceiver<String>, inbound: mpsc::UnboundedSender<Inbound>) {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            raw = outbound.recv() => {
                let Some(raw) = raw else {
                    // Client retired the link.
                    let _ = sink.close().await;
                    break;
                };
                if let Err(e) = sink.send(Message::text(raw)).await {
                    let _ = inbound.send(Err(TransportError::Socket(e.to_string())));
                    break;
                }
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(Ok(text.as_str().to_owned())).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    debug!(len = bytes.len(), "ws: ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = inbound.send(Err(TransportError::Socket(e.to_string())));
                    break;
                }
            },
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
