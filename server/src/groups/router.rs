//! Group chat over `/ws/group/{group_id}`.
//!
//! A connection is authorized (group exists, caller is an accepted member)
//! before anything is registered. Once open it receives the recent history
//! as one array, then every message posted to the group by any member.

use axum::extract::ws::WebSocket;
use chrono::Utc;

use crate::config::ChatConfig;
use crate::db::models::{notification_type, GroupMessage, GroupMessageView, UserSummary};
use crate::delivery::{DeliveryEngine, OutboundNotification};
use crate::session::Identity;
use crate::state::AppState;
use crate::store::{self, SharedBackend, StoreError};
use crate::ws::actor::{Connection, InboundHandler};
use crate::ws::protocol::{ErrorPayload, InboundGroupMessage};
use crate::ws::{Channel, ConnectionHandle};

/// Why a caller may not join a group chat. The display strings are the
/// payloads sent to the client before the socket is closed.
#[derive(Debug, thiserror::Error)]
pub enum GroupDenied {
    #[error("Group does not exist")]
    NoSuchGroup,
    #[error("Not a member of this group")]
    NotMember,
    #[error("Internal server error")]
    Store(#[from] StoreError),
}

/// Existence is checked before membership so a missing group is reported as
/// such rather than as a membership failure.
pub async fn authorize(store: &SharedBackend, user_id: &str, group_id: &str) -> Result<(), GroupDenied> {
    let user_id = user_id.to_string();
    let group_id = group_id.to_string();
    store::blocking(store, move |backend| {
        if !backend.group_exists(&group_id)? {
            return Ok(Err(GroupDenied::NoSuchGroup));
        }
        if !backend.is_group_member(&user_id, &group_id)? {
            return Ok(Err(GroupDenied::NotMember));
        }
        Ok(Ok(()))
    })
    .await?
}

/// Run one authorized group chat connection to completion.
pub async fn run(socket: WebSocket, state: AppState, identity: Identity, group_id: String) {
    let connection = Connection::new(socket, state.chat.keep_alive());
    let conn = connection.handle();
    let _slot = state.connections.slot(
        Channel::Group(group_id.clone()),
        &identity.user_id,
        conn.clone(),
    );

    let limit = state.chat.group_history_limit;
    let gid = group_id.clone();
    match store::blocking(&state.store, move |backend| backend.recent_group_messages(&gid, limit)).await {
        Ok(recent) => {
            let _ = conn.send_json(&recent);
        }
        Err(e) => {
            tracing::error!(group_id = %group_id, error = %e, "Failed to load recent group messages");
        }
    }

    let sender = sender_summary(&state.store, &identity).await;
    let handler = GroupChat {
        group_id,
        sender,
        conn,
        store: state.store.clone(),
        delivery: state.delivery.clone(),
        limits: state.chat.clone(),
    };
    connection.run(&identity.username, handler).await;
}

/// Username and avatar stamped on every outgoing message of this connection.
async fn sender_summary(store: &SharedBackend, identity: &Identity) -> UserSummary {
    let user_id = identity.user_id.clone();
    match store::blocking(store, move |backend| backend.user_summary(&user_id)).await {
        Ok(Some(summary)) => summary,
        Ok(None) => fallback_summary(identity),
        Err(e) => {
            tracing::warn!(user_id = %identity.user_id, error = %e, "Failed to load sender profile");
            fallback_summary(identity)
        }
    }
}

fn fallback_summary(identity: &Identity) -> UserSummary {
    UserSummary {
        id: identity.user_id.clone(),
        username: identity.username.clone(),
        avatar: String::new(),
    }
}

struct GroupChat {
    group_id: String,
    sender: UserSummary,
    conn: ConnectionHandle,
    store: SharedBackend,
    delivery: DeliveryEngine,
    limits: ChatConfig,
}

impl GroupChat {
    fn validate(&self, content: &str) -> Result<(), ErrorPayload> {
        if content.trim().is_empty() {
            return Err(ErrorPayload::new("Message must be at least 1 character long"));
        }
        if content.chars().count() > self.limits.max_group_message_len {
            return Err(ErrorPayload::new(format!(
                "Message must not exceed {} characters",
                self.limits.max_group_message_len
            )));
        }
        Ok(())
    }

    async fn post(&self, content: String) -> Result<(), ErrorPayload> {
        self.validate(&content)?;

        let message = GroupMessage {
            id: uuid::Uuid::now_v7().to_string(),
            group_id: self.group_id.clone(),
            sender_id: self.sender.id.clone(),
            content,
            created_at: Utc::now(),
        };

        let saved = message.clone();
        store::blocking(&self.store, move |backend| backend.save_group_message(&saved))
            .await
            .map_err(|e| {
                tracing::error!(
                    group_id = %self.group_id,
                    user_id = %self.sender.id,
                    error = %e,
                    "Failed to save group message"
                );
                ErrorPayload::new("Failed to save message")
            })?;

        self.notify_members(&message.content).await;

        let view = GroupMessageView::from_message(message, &self.sender);
        let delivered = self.delivery.broadcast_group(&self.group_id, &view);
        tracing::debug!(
            group_id = %self.group_id,
            message_id = %view.id,
            delivered = delivered,
            "Group message broadcast"
        );
        Ok(())
    }

    /// Notify every accepted member except the sender. A failed member
    /// lookup is logged and does not stop the broadcast.
    async fn notify_members(&self, content: &str) {
        let group_id = self.group_id.clone();
        let sender_id = self.sender.id.clone();
        let recipients = store::blocking(&self.store, move |backend| {
            let mut names = Vec::new();
            for member_id in backend.group_member_ids(&group_id)? {
                if member_id == sender_id {
                    continue;
                }
                if let Some(name) = backend.username_from_user_id(&member_id)? {
                    names.push(name);
                }
            }
            Ok(names)
        })
        .await;

        match recipients {
            Ok(recipients) => {
                for recipient in recipients {
                    self.delivery.notify(OutboundNotification::new(
                        recipient,
                        self.sender.username.clone(),
                        notification_type::GROUP_MESSAGE,
                        content,
                    ));
                }
            }
            Err(e) => {
                tracing::error!(group_id = %self.group_id, error = %e, "Failed to list group members");
            }
        }
    }
}

impl InboundHandler for GroupChat {
    async fn on_text(&mut self, text: String) {
        let reply = match serde_json::from_str::<InboundGroupMessage>(&text) {
            Ok(inbound) => self.post(inbound.content).await.err(),
            Err(e) => {
                tracing::debug!(group_id = %self.group_id, error = %e, "Malformed group frame");
                Some(ErrorPayload::new("Invalid message format"))
            }
        };

        if let Some(reply) = reply {
            let _ = self.conn.send_json(&reply);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{MembershipStatus, NewUser};
    use crate::store::SqliteStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn authorize_checks_existence_then_membership() {
        let store = Arc::new(SqliteStore::new(crate::db::open_in_memory().unwrap()));
        let owner = store
            .create_user(&NewUser {
                username: "owner".into(),
                email: "owner@example.com".into(),
                ..Default::default()
            })
            .unwrap();
        let invitee = store
            .create_user(&NewUser {
                username: "invitee".into(),
                email: "invitee@example.com".into(),
                ..Default::default()
            })
            .unwrap();
        let group = store.create_group(&owner, "Hikers", "").unwrap();
        store
            .set_membership(&group, &invitee, MembershipStatus::Invited)
            .unwrap();
        let backend: SharedBackend = store.clone();

        assert!(authorize(&backend, &owner, &group).await.is_ok());
        assert!(matches!(
            authorize(&backend, &invitee, &group).await,
            Err(GroupDenied::NotMember)
        ));
        assert!(matches!(
            authorize(&backend, &owner, "missing").await,
            Err(GroupDenied::NoSuchGroup)
        ));

        store
            .set_membership(&group, &invitee, MembershipStatus::Accepted)
            .unwrap();
        assert!(authorize(&backend, &invitee, &group).await.is_ok());
    }

    #[test]
    fn denial_messages_match_client_payloads() {
        assert_eq!(GroupDenied::NoSuchGroup.to_string(), "Group does not exist");
        assert_eq!(GroupDenied::NotMember.to_string(), "Not a member of this group");
    }
}
