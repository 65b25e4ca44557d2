//! Collaborator interfaces consumed by the messaging core.
//!
//! Session lookup, the user directory, durable message storage and the group
//! membership oracle are owned by the rest of the backend. The core only sees
//! these traits; `SqliteStore` is the production implementation.
//!
//! All methods are synchronous (rusqlite). Async code goes through
//! [`blocking`], which runs the call on tokio's blocking pool.

pub mod sqlite;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::models::{
    GroupMessage, GroupMessageView, Notification, StoredDirectMessage, UserSummary,
};

pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Invalid(&'static str),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Session token and username ⇆ user id lookups.
pub trait SessionDirectory {
    /// Resolve a non-expired session token to its user id.
    fn user_id_from_token(&self, token: &str) -> Result<Option<String>, StoreError>;

    fn username_from_user_id(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    /// Accepts a username or an email address.
    /// Returns `StoreError::NotFound` when neither matches.
    fn user_id_from_username(&self, username: &str) -> Result<String, StoreError>;
}

pub trait UserDirectory {
    fn all_usernames(&self) -> Result<Vec<String>, StoreError>;

    fn all_usernames_except(&self, username: &str) -> Result<Vec<String>, StoreError>;

    fn user_summary(&self, user_id: &str) -> Result<Option<UserSummary>, StoreError>;
}

/// Durable storage for direct messages, group messages and notifications.
pub trait MessageStore {
    fn save_direct_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        kind: &str,
        created_at: DateTime<Utc>,
    ) -> Result<StoredDirectMessage, StoreError>;

    /// Both directions of the conversation, oldest first.
    fn direct_history(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<StoredDirectMessage>, StoreError>;

    fn save_group_message(&self, message: &GroupMessage) -> Result<(), StoreError>;

    /// Most recent messages of a group, newest first.
    fn recent_group_messages(
        &self,
        group_id: &str,
        limit: u32,
    ) -> Result<Vec<GroupMessageView>, StoreError>;

    fn save_notification(&self, notification: &Notification) -> Result<(), StoreError>;

    /// Notifications addressed to a user, newest first.
    fn notifications_for(&self, user_id: &str) -> Result<Vec<Notification>, StoreError>;

    /// Returns false when no notification with that id belongs to the user.
    fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<bool, StoreError>;
}

/// Read-only view of group membership.
pub trait MembershipOracle {
    fn group_exists(&self, group_id: &str) -> Result<bool, StoreError>;

    /// True only for status `accepted`.
    fn is_group_member(&self, user_id: &str, group_id: &str) -> Result<bool, StoreError>;

    /// Ids of accepted members.
    fn group_member_ids(&self, group_id: &str) -> Result<Vec<String>, StoreError>;
}

/// Everything the messaging core needs from the outside world.
pub trait Backend:
    SessionDirectory + UserDirectory + MessageStore + MembershipOracle + Send + Sync + 'static
{
}

impl<T> Backend for T where
    T: SessionDirectory + UserDirectory + MessageStore + MembershipOracle + Send + Sync + 'static
{
}

pub type SharedBackend = Arc<dyn Backend>;

/// Run a backend call on the blocking pool.
pub async fn blocking<T, F>(backend: &SharedBackend, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&dyn Backend) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let backend = backend.clone();
    tokio::task::spawn_blocking(move || f(backend.as_ref())).await?
}
