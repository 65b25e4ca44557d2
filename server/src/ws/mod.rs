pub mod actor;
pub mod handler;
pub mod protocol;
pub mod registry;

use axum::extract::ws::Message;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub use registry::{Channel, ConnectionRegistry};

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system clone this (through [`ConnectionHandle`]) to push
/// messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("connection {0} is closed")]
pub struct ConnectionClosed(pub ConnectionId);

/// Cloneable handle to one connection's outbound queue.
///
/// Writes are non-blocking enqueues; the connection's writer task drains the
/// queue into the socket. Once the writer dies the receiver is dropped and
/// every further `send` fails, which is how delivery detects dead sockets.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: ConnectionSender,
}

impl ConnectionHandle {
    /// Allocate a handle together with the receiving end of its queue.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, msg: Message) -> Result<(), ConnectionClosed> {
        self.tx.send(msg).map_err(|_| ConnectionClosed(self.id))
    }

    /// Serialize `payload` as JSON and enqueue it as a text frame.
    pub fn send_json<T: serde::Serialize>(&self, payload: &T) -> Result<(), ConnectionClosed> {
        match protocol::text_frame(payload) {
            Ok(frame) => self.send(frame),
            Err(e) => {
                tracing::error!(connection = %self.id, error = %e, "Failed to encode payload");
                Ok(())
            }
        }
    }
}
