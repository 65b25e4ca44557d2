use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::MutexGuard;

use super::{MembershipOracle, MessageStore, SessionDirectory, StoreError, UserDirectory};
use crate::db::models::{
    GroupMessage, GroupMessageView, MembershipStatus, NewUser, Notification,
    StoredDirectMessage, UserSummary,
};
use crate::db::DbPool;

/// SQLite-backed implementation of every collaborator trait.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert a user row and return its id.
    pub fn create_user(&self, user: &NewUser) -> Result<String, StoreError> {
        if user.username.trim().is_empty() {
            return Err(StoreError::Invalid("username cannot be empty"));
        }
        let id = uuid::Uuid::now_v7().to_string();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, username, email, first_name, last_name, avatar, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                user.username,
                user.email,
                user.first_name,
                user.last_name,
                user.avatar,
                Utc::now(),
            ],
        )?;
        Ok(id)
    }

    /// Open a session for a user and return the opaque token stored in the
    /// `token` cookie.
    pub fn create_session(&self, user_id: &str, ttl: Duration) -> Result<String, StoreError> {
        let token = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (id, user_id, token, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                uuid::Uuid::now_v7().to_string(),
                user_id,
                token,
                now + ttl,
                now,
            ],
        )?;
        Ok(token)
    }

    /// Create a group; the creator becomes an accepted member.
    pub fn create_group(
        &self,
        creator_id: &str,
        title: &str,
        description: &str,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::now_v7().to_string();
        let now = Utc::now();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO groups (id, title, description, creator_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, title, description, creator_id, now],
        )?;
        tx.execute(
            "INSERT INTO group_members (group_id, user_id, status, created_at)
             VALUES (?1, ?2, 'accepted', ?3)",
            params![id, creator_id, now],
        )?;
        tx.commit()?;
        Ok(id)
    }

    /// Insert or update a membership row.
    pub fn set_membership(
        &self,
        group_id: &str,
        user_id: &str,
        status: MembershipStatus,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO group_members (group_id, user_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (group_id, user_id) DO UPDATE SET status = excluded.status",
            params![group_id, user_id, status.as_str(), Utc::now()],
        )?;
        Ok(())
    }
}

fn direct_message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredDirectMessage> {
    Ok(StoredDirectMessage {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        kind: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        sender_id: row.get(2)?,
        notif_type: row.get(3)?,
        content: row.get(4)?,
        is_read: row.get(5)?,
        created_at: row.get(6)?,
        sender_username: row.get(7)?,
    })
}

impl SessionDirectory for SqliteStore {
    fn user_id_from_token(&self, token: &str) -> Result<Option<String>, StoreError> {
        if token.is_empty() {
            return Ok(None);
        }
        let conn = self.conn()?;
        let user_id = conn
            .query_row(
                "SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > ?2",
                params![token, Utc::now()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(user_id)
    }

    fn username_from_user_id(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let username = conn
            .query_row(
                "SELECT username FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(username)
    }

    fn user_id_from_username(&self, username: &str) -> Result<String, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id FROM users WHERE username = ?1 OR email = ?1",
            params![username],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("user {username}")))
    }
}

impl UserDirectory for SqliteStore {
    fn all_usernames(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT username FROM users ORDER BY username")?;
        let usernames = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(usernames)
    }

    fn all_usernames_except(&self, username: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT username FROM users WHERE username != ?1 ORDER BY username")?;
        let usernames = stmt
            .query_map(params![username], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(usernames)
    }

    fn user_summary(&self, user_id: &str) -> Result<Option<UserSummary>, StoreError> {
        let conn = self.conn()?;
        let summary = conn
            .query_row(
                "SELECT id, username, COALESCE(avatar, '') FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(UserSummary {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        avatar: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }
}

impl MessageStore for SqliteStore {
    fn save_direct_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        kind: &str,
        created_at: DateTime<Utc>,
    ) -> Result<StoredDirectMessage, StoreError> {
        if content.is_empty() {
            return Err(StoreError::Invalid("message content cannot be empty"));
        }
        if sender_id == receiver_id {
            return Err(StoreError::Invalid("sender and receiver cannot be the same"));
        }

        let message = StoredDirectMessage {
            id: uuid::Uuid::now_v7().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            kind: kind.to_string(),
            created_at,
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, content, kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id,
                message.sender_id,
                message.receiver_id,
                message.content,
                message.kind,
                message.created_at,
            ],
        )?;
        Ok(message)
    }

    fn direct_history(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<StoredDirectMessage>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, sender_id, receiver_id, content, kind, created_at
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let messages = stmt
            .query_map(params![user_a, user_b], direct_message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    fn save_group_message(&self, message: &GroupMessage) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO group_messages (id, group_id, sender_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id,
                message.group_id,
                message.sender_id,
                message.content,
                message.created_at,
            ],
        )?;
        Ok(())
    }

    fn recent_group_messages(
        &self,
        group_id: &str,
        limit: u32,
    ) -> Result<Vec<GroupMessageView>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT m.id, m.group_id, m.sender_id, m.content, m.created_at,
                    u.username, COALESCE(u.avatar, '')
             FROM group_messages m
             JOIN users u ON m.sender_id = u.id
             WHERE m.group_id = ?1
             ORDER BY m.created_at DESC, m.rowid DESC
             LIMIT ?2",
        )?;
        let messages = stmt
            .query_map(params![group_id, limit], |row| {
                Ok(GroupMessageView {
                    id: row.get(0)?,
                    group_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                    username: row.get(5)?,
                    avatar: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    fn save_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notifications (id, user_id, sender_id, type, content, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                notification.id,
                notification.user_id,
                notification.sender_id,
                notification.notif_type,
                notification.content,
                notification.is_read,
                notification.created_at,
            ],
        )?;
        Ok(())
    }

    fn notifications_for(&self, user_id: &str) -> Result<Vec<Notification>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT n.id, n.user_id, n.sender_id, n.type, n.content, n.is_read, n.created_at,
                    COALESCE(u.username, '')
             FROM notifications n
             LEFT JOIN users u ON n.sender_id = u.id
             WHERE n.user_id = ?1
             ORDER BY n.created_at DESC, n.rowid DESC",
        )?;
        let notifications = stmt
            .query_map(params![user_id], notification_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(updated > 0)
    }
}

impl MembershipOracle for SqliteStore {
    fn group_exists(&self, group_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM groups WHERE id = ?1)",
            params![group_id],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(exists)
    }

    fn is_group_member(&self, user_id: &str, group_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let member = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM group_members
                WHERE group_id = ?1 AND user_id = ?2 AND status = 'accepted'
             )",
            params![group_id, user_id],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(member)
    }

    fn group_member_ids(&self, group_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id FROM group_members WHERE group_id = ?1 AND status = 'accepted'",
        )?;
        let members = stmt
            .query_map(params![group_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }
}
