//! REST endpoint for direct-message history.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::session::Session;
use crate::state::AppState;
use crate::store::{self, StoreError};
use crate::ws::protocol::DirectPayload;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receiver: String,
}

/// GET /api/messages?sender=&receiver=
/// Both directions of a conversation, oldest first. The caller must be one
/// of the two parties.
pub async fn get_messages(
    State(state): State<AppState>,
    Session(identity): Session,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<DirectPayload>>, StatusCode> {
    if query.sender.is_empty() || query.receiver.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if identity.username != query.sender && identity.username != query.receiver {
        return Err(StatusCode::FORBIDDEN);
    }

    let HistoryQuery { sender, receiver } = query;
    let result = store::blocking(&state.store, move |backend| {
        let sender_id = backend.user_id_from_username(&sender)?;
        let receiver_id = backend.user_id_from_username(&receiver)?;
        let rows = backend.direct_history(&sender_id, &receiver_id)?;

        let messages: Vec<DirectPayload> = rows
            .into_iter()
            .map(|row| {
                let (from, to) = if row.sender_id == sender_id {
                    (sender.clone(), receiver.clone())
                } else {
                    (receiver.clone(), sender.clone())
                };
                DirectPayload {
                    message: row.content,
                    username: from,
                    receiver: to,
                    time: row.created_at,
                    kind: row.kind,
                }
            })
            .collect();
        Ok(messages)
    })
    .await;

    match result {
        Ok(messages) => Ok(Json(messages)),
        Err(StoreError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(user_id = %identity.user_id, error = %e, "Failed to load message history");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
