use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::ws::ConnectionHandle;

/// Keep-alive timings. A ping goes out every `ping_interval`; a connection
/// whose pong does not arrive within `pong_timeout` is closed.
/// Prevents connection leaks from abrupt disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-channel logic for inbound text frames.
///
/// Called sequentially, so frames of one connection are handled in receipt
/// order. Implementations reply through their own [`ConnectionHandle`] clone
/// and must not panic on bad input.
pub trait InboundHandler: Send {
    fn on_text(&mut self, text: String) -> impl Future<Output = ()> + Send;
}

/// Handler for channels that only push (notifications): inbound frames are
/// read to detect disconnects and otherwise dropped.
pub struct IgnoreInbound;

impl InboundHandler for IgnoreInbound {
    async fn on_text(&mut self, text: String) {
        tracing::trace!(bytes = text.len(), "Ignoring inbound frame on push-only channel");
    }
}

/// An upgraded socket plus the outbound queue other tasks write into.
pub struct Connection {
    socket: WebSocket,
    handle: ConnectionHandle,
    rx: mpsc::UnboundedReceiver<Message>,
    keep_alive: KeepAlive,
}

impl Connection {
    pub fn new(socket: WebSocket, keep_alive: KeepAlive) -> Self {
        let (handle, rx) = ConnectionHandle::new();
        Self {
            socket,
            handle,
            rx,
            keep_alive,
        }
    }

    /// Handle for registering this connection and queueing frames to it.
    /// Frames queued before [`Connection::run`] are flushed once it starts.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Run the actor-per-connection pattern until the socket closes.
    ///
    /// Splits the WebSocket into reader and writer halves:
    /// - Writer task: owns the sink, forwards messages from the mpsc queue
    /// - Ping task: keeps the socket honest, closes it on pong timeout
    /// - Reader loop (this task): dispatches text frames to `handler`
    ///
    /// Returns as soon as any of the three stops, so a peer that goes silent
    /// without closing still ends the connection after one pong timeout.
    pub async fn run<H: InboundHandler>(self, user: &str, mut handler: H) {
        let Connection {
            socket,
            handle,
            rx,
            keep_alive,
        } = self;
        let (ws_sender, mut ws_receiver) = socket.split();

        let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

        // Track pong reception
        let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

        let ping_conn = handle.clone();
        let mut ping_handle = tokio::spawn(async move {
            let mut ping_timer = interval(keep_alive.ping_interval);
            // Skip the first immediate tick
            ping_timer.tick().await;

            loop {
                ping_timer.tick().await;

                if ping_conn.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                    // Writer task is gone, so is the connection
                    break;
                }

                match timeout(keep_alive.pong_timeout, pong_rx.recv()).await {
                    Ok(Some(())) => {}
                    _ => {
                        tracing::warn!(connection = %ping_conn.id(), "Pong timeout, closing connection");
                        let _ = ping_conn.send(Message::Close(Some(CloseFrame {
                            code: 1001,
                            reason: "Pong timeout".into(),
                        })));
                        break;
                    }
                }
            }
        });

        tracing::info!(user = %user, connection = %handle.id(), "WebSocket actor started");

        loop {
            let next = tokio::select! {
                next = ws_receiver.next() => next,
                _ = &mut ping_handle => {
                    tracing::info!(user = %user, "Keep-alive ended, dropping connection");
                    break;
                }
                _ = &mut writer_handle => {
                    tracing::info!(user = %user, "Writer stopped, dropping connection");
                    break;
                }
            };

            match next {
                Some(Ok(msg)) => match msg {
                    Message::Text(text) => {
                        handler.on_text(text.as_str().to_owned()).await;
                    }
                    Message::Binary(data) => {
                        tracing::debug!(
                            user = %user,
                            bytes = data.len(),
                            "Ignoring binary frame (JSON text expected)"
                        );
                    }
                    Message::Pong(_) => {
                        let _ = pong_tx.send(());
                    }
                    Message::Ping(data) => {
                        let _ = handle.send(Message::Pong(data));
                    }
                    Message::Close(frame) => {
                        tracing::info!(user = %user, reason = ?frame, "Client initiated close");
                        break;
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(user = %user, error = %e, "WebSocket receive error");
                    break;
                }
                None => {
                    tracing::info!(user = %user, "WebSocket stream ended");
                    break;
                }
            }
        }

        writer_handle.abort();
        ping_handle.abort();

        tracing::info!(user = %user, connection = %handle.id(), "WebSocket actor stopped");
    }
}

/// Writer task: receives messages from the queue and forwards them to the sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            // Dropping rx here makes every later enqueue fail, which is how
            // delivery notices the connection is dead.
            break;
        }
    }
}
