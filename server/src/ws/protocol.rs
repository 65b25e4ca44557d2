//! JSON payload shapes exchanged over the WebSocket endpoints.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::Notification;

/// Default `type` tag of a direct payload.
pub const KIND_MESSAGE: &str = "message";
/// Typing indicators are relayed live and never persisted.
pub const KIND_TYPING: &str = "typing";

/// Inbound frame on `/ws`.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundDirect {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub receiver: String,
    /// Claimed sender; always replaced by the authenticated username
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Direct message as pushed to the receiver and returned by the history
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectPayload {
    pub message: String,
    pub username: String,
    pub receiver: String,
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Online/offline lists as seen by one viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresencePayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub online: Vec<String>,
    pub offline: Vec<String>,
}

impl PresencePayload {
    pub fn new(online: Vec<String>, offline: Vec<String>) -> Self {
        Self {
            kind: "presence".to_string(),
            online,
            offline,
        }
    }
}

/// Inbound frame on `/ws/group/{group_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundGroupMessage {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub notification: Notification,
}

impl NotificationEvent {
    pub fn new(notification: Notification) -> Self {
        Self {
            kind: "new_notification".to_string(),
            notification,
        }
    }
}

/// `{"error": "..."}`, optionally tagged `"type": "error"` (direct channel).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub error: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ErrorPayload {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind: None,
        }
    }

    pub fn typed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind: Some("error".to_string()),
        }
    }
}

/// Encode a payload as a text frame.
pub fn text_frame<T: Serialize>(payload: &T) -> Result<Message, serde_json::Error> {
    let json = serde_json::to_string(payload)?;
    Ok(Message::Text(json.into()))
}
