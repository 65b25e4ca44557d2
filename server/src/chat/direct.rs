//! Direct-message WebSocket channel (`/ws`).

use axum::extract::ws::WebSocket;

use crate::db::models::notification_type;
use crate::delivery::{DeliveryEngine, OutboundMessage, OutboundNotification};
use crate::session::Identity;
use crate::state::AppState;
use crate::ws::actor::{Connection, InboundHandler};
use crate::ws::protocol::{ErrorPayload, InboundDirect, KIND_MESSAGE, KIND_TYPING};
use crate::ws::{Channel, ConnectionHandle};

/// Run one authenticated `/ws` connection to completion.
///
/// Presence is rebroadcast once the connection is registered and again
/// after it is gone.
pub async fn run(socket: WebSocket, state: AppState, identity: Identity) {
    let connection = Connection::new(socket, state.chat.keep_alive());
    let slot = state
        .connections
        .slot(Channel::Direct, &identity.username, connection.handle());
    state.presence.broadcast().await;

    let handler = DirectChat {
        conn: connection.handle(),
        delivery: state.delivery.clone(),
        max_len: state.chat.max_direct_message_len,
        identity: identity.clone(),
    };
    connection.run(&identity.username, handler).await;

    drop(slot);
    state.presence.broadcast().await;
}

struct DirectChat {
    identity: Identity,
    conn: ConnectionHandle,
    delivery: DeliveryEngine,
    max_len: usize,
}

impl DirectChat {
    async fn handle(&self, inbound: InboundDirect) -> Result<(), ErrorPayload> {
        if inbound.receiver.trim().is_empty() {
            return Err(ErrorPayload::typed("Receiver is required"));
        }

        if let Some(claimed) = inbound.username.as_deref() {
            if !claimed.is_empty() && claimed != self.identity.username {
                tracing::debug!(
                    user = %self.identity.username,
                    claimed = %claimed,
                    "Ignoring claimed sender on direct message"
                );
            }
        }

        let kind = inbound
            .kind
            .filter(|kind| !kind.is_empty())
            .unwrap_or_else(|| KIND_MESSAGE.to_string());
        let msg = OutboundMessage::new(
            self.identity.username.clone(),
            inbound.receiver.trim(),
            inbound.message,
            kind,
        );

        if msg.content.trim().is_empty() {
            return Err(ErrorPayload::typed("Message content is required"));
        }

        if msg.kind == KIND_TYPING {
            if let Err(e) = self.delivery.relay_direct(&msg) {
                tracing::warn!(user = %msg.sender, error = %e, "Typing relay failed");
            }
            return Ok(());
        }
        if msg.content.chars().count() > self.max_len {
            return Err(ErrorPayload::typed(format!(
                "Message must not exceed {} characters",
                self.max_len
            )));
        }

        self.delivery
            .deliver_direct(&msg)
            .await
            .map_err(|e| ErrorPayload::typed(format!("Failed to save message: {e}")))?;

        self.delivery.notify(OutboundNotification::new(
            msg.receiver,
            msg.sender,
            notification_type::MESSAGE,
            msg.content,
        ));
        Ok(())
    }
}

impl InboundHandler for DirectChat {
    async fn on_text(&mut self, text: String) {
        let reply = match serde_json::from_str::<InboundDirect>(&text) {
            Ok(inbound) => self.handle(inbound).await.err(),
            Err(e) => {
                tracing::debug!(user = %self.identity.username, error = %e, "Malformed direct frame");
                Some(ErrorPayload::typed("Invalid message format"))
            }
        };

        if let Some(reply) = reply {
            let _ = self.conn.send_json(&reply);
        }
    }
}
