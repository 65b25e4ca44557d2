/// Row types for the messaging tables defined in migrations.rs.
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Minimal user record used to decorate outbound payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    /// Empty when the user never uploaded an avatar
    pub avatar: String,
}

/// Input for seeding a user row. Registration itself lives outside the
/// messaging server.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
}

/// Persisted direct message (messages table)
#[derive(Debug, Clone)]
pub struct StoredDirectMessage {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

/// Group chat message as written to group_messages.
#[derive(Debug, Clone)]
pub struct GroupMessage {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Group chat message joined with its sender's username and avatar.
/// This is also the exact JSON shape pushed to group chat sockets.
#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq)]
pub struct GroupMessageView {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub avatar: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub username: String,
}

impl GroupMessageView {
    pub fn from_message(message: GroupMessage, sender: &UserSummary) -> Self {
        Self {
            id: message.id,
            group_id: message.group_id,
            sender_id: message.sender_id,
            avatar: sender.avatar.clone(),
            content: message.content,
            created_at: message.created_at,
            username: sender.username.clone(),
        }
    }
}

/// Notification row, serialized as-is inside `new_notification` pushes
/// and the notifications listing.
#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub notif_type: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub sender_username: String,
}

/// Notification type tags used across the server.
pub mod notification_type {
    pub const MESSAGE: &str = "message";
    pub const GROUP_MESSAGE: &str = "group_message";
}

/// Membership status stored in group_members.status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    Pending,
    Accepted,
    Invited,
    Declined,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Invited => "invited",
            Self::Declined => "declined",
        }
    }
}
