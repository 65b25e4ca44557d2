//! Notification channel: the push-only `/ws/notifications` socket plus the
//! REST listing and mark-read endpoints.

use axum::{extract::State, extract::ws::WebSocket, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::db::models::Notification;
use crate::session::{Identity, Session};
use crate::state::AppState;
use crate::store;
use crate::ws::actor::{Connection, IgnoreInbound};
use crate::ws::Channel;

/// Run one authenticated notifications connection until it closes.
pub async fn run(socket: WebSocket, state: AppState, identity: Identity) {
    let connection = Connection::new(socket, state.chat.keep_alive());
    let _slot = state.connections.slot(
        Channel::Notifications,
        &identity.username,
        connection.handle(),
    );
    connection.run(&identity.username, IgnoreInbound).await;
}

/// GET /api/notifications: the caller's notifications, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Session(identity): Session,
) -> Result<Json<Vec<Notification>>, StatusCode> {
    let user_id = identity.user_id.clone();
    store::blocking(&state.store, move |backend| backend.notifications_for(&user_id))
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(user_id = %identity.user_id, error = %e, "Failed to list notifications");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub notification_id: String,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub success: bool,
}

/// POST /api/notifications/read: mark one of the caller's notifications as
/// read. 404 when it does not exist or belongs to someone else.
pub async fn mark_read(
    State(state): State<AppState>,
    Session(identity): Session,
    Json(body): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, StatusCode> {
    if body.notification_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let user_id = identity.user_id.clone();
    let updated = store::blocking(&state.store, move |backend| {
        backend.mark_notification_read(&body.notification_id, &user_id)
    })
    .await
    .map_err(|e| {
        tracing::error!(user_id = %identity.user_id, error = %e, "Failed to mark notification read");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if !updated {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(MarkReadResponse { success: true }))
}
