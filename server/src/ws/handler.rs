use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Path, State,
    },
    http::{header::ORIGIN, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::chat;
use crate::groups::router::{self as group_router, GroupDenied};
use crate::notifications;
use crate::session::Session;
use crate::state::AppState;
use crate::ws::protocol::{self, ErrorPayload};

/// WebSocket close codes:
/// 4001 = missing, unknown or expired session token
/// 4003 = authenticated but not allowed on this channel
/// 1011 = session or membership lookup failed
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
pub const CLOSE_FORBIDDEN: u16 = 4003;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// GET /ws
/// Direct messages and presence. On auth failure, upgrades then sends one
/// error payload and closes; nothing is registered.
pub async fn direct_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    session: Result<Session, StatusCode>,
    ws: WebSocketUpgrade,
) -> Response {
    if !origin_allowed(&state.allowed_origins, &headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let identity = match session {
        Ok(Session(identity)) => identity,
        Err(status) => return reject_session(ws, "direct", status),
    };

    tracing::info!(user_id = %identity.user_id, username = %identity.username, "Direct WebSocket authenticated");
    ws.on_upgrade(move |socket| chat::direct::run(socket, state, identity))
}

/// GET /ws/group/{group_id}
/// Group chat. Authentication and group authorization both complete before
/// the connection is registered.
pub async fn group_upgrade(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
    session: Result<Session, StatusCode>,
    ws: WebSocketUpgrade,
) -> Response {
    if !origin_allowed(&state.allowed_origins, &headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let identity = match session {
        Ok(Session(identity)) => identity,
        Err(status) => return reject_session(ws, "group", status),
    };

    if let Err(denied) = group_router::authorize(&state.store, &identity.user_id, &group_id).await {
        let code = match &denied {
            GroupDenied::Store(e) => {
                tracing::error!(group_id = %group_id, error = %e, "Group authorization lookup failed");
                CLOSE_INTERNAL_ERROR
            }
            _ => {
                tracing::warn!(
                    user_id = %identity.user_id,
                    group_id = %group_id,
                    reason = %denied,
                    "Group chat connection refused"
                );
                CLOSE_FORBIDDEN
            }
        };
        return reject(ws, code, denied.to_string());
    }

    tracing::info!(user_id = %identity.user_id, group_id = %group_id, "Group WebSocket authenticated");
    ws.on_upgrade(move |socket| group_router::run(socket, state, identity, group_id))
}

/// GET /ws/notifications
/// Push-only notification channel.
pub async fn notifications_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    session: Result<Session, StatusCode>,
    ws: WebSocketUpgrade,
) -> Response {
    if !origin_allowed(&state.allowed_origins, &headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let identity = match session {
        Ok(Session(identity)) => identity,
        Err(status) => return reject_session(ws, "notifications", status),
    };

    tracing::info!(user_id = %identity.user_id, "Notifications WebSocket authenticated");
    ws.on_upgrade(move |socket| notifications::run(socket, state, identity))
}

/// Browser clients always send `Origin`; requests without one are not
/// subject to the check.
fn origin_allowed(allowed: &[String], headers: &HeaderMap) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match headers.get(ORIGIN).map(|v| v.to_str()) {
        None => true,
        Some(Ok(origin)) => allowed.iter().any(|a| a == origin),
        Some(Err(_)) => false,
    }
}

/// Close code and error payload for a failed session lookup: 4001 for a
/// missing or unknown token, 1011 when the lookup itself failed.
fn session_failure(status: StatusCode) -> (u16, &'static str) {
    if status.is_server_error() {
        (CLOSE_INTERNAL_ERROR, "Internal server error")
    } else {
        (CLOSE_UNAUTHORIZED, "Unauthorized")
    }
}

fn reject_session(ws: WebSocketUpgrade, channel: &'static str, status: StatusCode) -> Response {
    let (code, error) = session_failure(status);
    tracing::warn!(channel = channel, status = %status, close_code = code, "WebSocket auth failed");
    reject(ws, code, error.to_string())
}

/// Upgrade the connection, send `{"error": ...}`, then close with `code`.
fn reject(ws: WebSocketUpgrade, code: u16, error: String) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        if let Ok(frame) = protocol::text_frame(&ErrorPayload::new(error.as_str())) {
            let _ = socket.send(frame).await;
        }
        let close_frame = CloseFrame {
            code,
            reason: error.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
