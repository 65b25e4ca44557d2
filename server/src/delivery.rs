//! Persist-then-push delivery of direct messages, notifications and group
//! chat messages.
//!
//! Persistence always happens first and unconditionally; offline recipients
//! pick messages up later through the history endpoints. The live push is a
//! fan-out over a registry snapshot: a failed write prunes that connection
//! and the remaining connections still receive the payload.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::db::models::{GroupMessageView, Notification};
use crate::store::{self, SharedBackend, StoreError};
use crate::ws::protocol::{self, DirectPayload, NotificationEvent};
use crate::ws::{Channel, ConnectionRegistry};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("{0} not found")]
    UnknownUser(String),
    #[error("{0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Store(StoreError),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<StoreError> for DeliveryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::UnknownUser(what),
            StoreError::Invalid(reason) => Self::Invalid(reason),
            other => Self::Store(other),
        }
    }
}

/// A direct message on its way out. Immutable once built.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub kind: String,
    pub time: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            content: content.into(),
            kind: kind.into(),
            time: Utc::now(),
        }
    }

    fn payload(&self) -> DirectPayload {
        DirectPayload {
            message: self.content.clone(),
            username: self.sender.clone(),
            receiver: self.receiver.clone(),
            time: self.time,
            kind: self.kind.clone(),
        }
    }
}

/// A notification request, addressed by usernames.
#[derive(Debug, Clone)]
pub struct OutboundNotification {
    pub recipient: String,
    pub sender: String,
    pub notif_type: String,
    pub content: String,
}

impl OutboundNotification {
    pub fn new(
        recipient: impl Into<String>,
        sender: impl Into<String>,
        notif_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            sender: sender.into(),
            notif_type: notif_type.into(),
            content: content.into(),
        }
    }
}

/// Outcome of a direct delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectReceipt {
    pub message_id: String,
    /// Number of live connections the message was written to
    pub delivered: usize,
}

#[derive(Clone)]
pub struct DeliveryEngine {
    registry: Arc<ConnectionRegistry>,
    store: SharedBackend,
}

impl DeliveryEngine {
    pub fn new(registry: Arc<ConnectionRegistry>, store: SharedBackend) -> Self {
        Self { registry, store }
    }

    /// Persist a direct message, then push it to every direct connection of
    /// the receiver. An offline receiver is not an error. A persistence
    /// failure returns early and nothing is pushed.
    pub async fn deliver_direct(&self, msg: &OutboundMessage) -> Result<DirectReceipt, DeliveryError> {
        if msg.sender.is_empty() || msg.receiver.is_empty() {
            return Err(DeliveryError::Invalid("sender and receiver are required"));
        }

        let sender = msg.sender.clone();
        let receiver = msg.receiver.clone();
        let content = msg.content.clone();
        let kind = msg.kind.clone();
        let time = msg.time;
        let stored = store::blocking(&self.store, move |backend| {
            let sender_id = backend.user_id_from_username(&sender)?;
            let receiver_id = backend.user_id_from_username(&receiver)?;
            backend.save_direct_message(&sender_id, &receiver_id, &content, &kind, time)
        })
        .await?;

        let frame = protocol::text_frame(&msg.payload())?;
        let delivered = fan_out(&self.registry, &Channel::Direct, &msg.receiver, &frame);

        tracing::debug!(
            message_id = %stored.id,
            sender = %msg.sender,
            receiver = %msg.receiver,
            delivered = delivered,
            "Direct message delivered"
        );

        Ok(DirectReceipt {
            message_id: stored.id,
            delivered,
        })
    }

    /// Push a transient direct payload (typing indicator) without persisting.
    pub fn relay_direct(&self, msg: &OutboundMessage) -> Result<usize, DeliveryError> {
        let frame = protocol::text_frame(&msg.payload())?;
        Ok(fan_out(&self.registry, &Channel::Direct, &msg.receiver, &frame))
    }

    /// Persist a notification and schedule its live push to the recipient's
    /// notification connections. Returns once the row is stored; the push
    /// runs on its own task.
    pub async fn deliver_notification(
        &self,
        request: OutboundNotification,
    ) -> Result<Notification, DeliveryError> {
        if request.recipient.is_empty() {
            return Err(DeliveryError::Invalid("recipient username cannot be empty"));
        }
        if request.sender.is_empty() {
            return Err(DeliveryError::Invalid("sender username cannot be empty"));
        }

        let notification = store::blocking(&self.store, move |backend| {
            let user_id = backend.user_id_from_username(&request.recipient)?;
            let sender_id = backend.user_id_from_username(&request.sender)?;
            let notification = Notification {
                id: uuid::Uuid::now_v7().to_string(),
                user_id,
                sender_id,
                notif_type: request.notif_type,
                content: request.content,
                is_read: false,
                created_at: Utc::now(),
                sender_username: request.sender,
            };
            backend.save_notification(&notification)?;
            Ok((request.recipient, notification))
        })
        .await;
        let (recipient, notification) = notification?;

        let engine = self.clone();
        let pushed = notification.clone();
        tokio::spawn(async move {
            engine.push_notification(&recipient, pushed);
        });

        Ok(notification)
    }

    /// Fire-and-forget wrapper around [`Self::deliver_notification`] for
    /// call sites where a notification must never hold up or fail the
    /// triggering operation. Failures are logged, not returned.
    pub fn notify(&self, request: OutboundNotification) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let recipient = request.recipient.clone();
            let notif_type = request.notif_type.clone();
            if let Err(e) = engine.deliver_notification(request).await {
                tracing::warn!(
                    recipient = %recipient,
                    notif_type = %notif_type,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        })
    }

    fn push_notification(&self, recipient: &str, notification: Notification) -> usize {
        let notification_id = notification.id.clone();
        let frame = match protocol::text_frame(&NotificationEvent::new(notification)) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode notification");
                return 0;
            }
        };

        let delivered = fan_out(&self.registry, &Channel::Notifications, recipient, &frame);
        if delivered == 0 {
            tracing::debug!(
                recipient = %recipient,
                notification_id = %notification_id,
                "Recipient not connected; notification stays available via listing"
            );
        }
        delivered
    }

    /// Write a group message to every registered connection of the group.
    pub fn broadcast_group(&self, group_id: &str, message: &GroupMessageView) -> usize {
        let frame = match protocol::text_frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(group_id = %group_id, error = %e, "Failed to encode group message");
                return 0;
            }
        };

        let channel = Channel::Group(group_id.to_string());
        let mut delivered = 0;
        for (user_id, conn) in self.registry.group_connections(group_id) {
            match conn.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        group_id = %group_id,
                        user_id = %user_id,
                        error = %e,
                        "Group write failed, pruning connection"
                    );
                    self.registry.unregister(&channel, &user_id, conn.id());
                }
            }
        }
        delivered
    }
}

/// Write `frame` to every connection `user` holds on `channel`. Dead
/// connections are pruned immediately. Returns the number of successful
/// writes.
///
/// A write only fails once the connection's writer task has stopped, which
/// also ends its actor; on the direct channel that exit runs the presence
/// recompute, so pruning here never leaves a stale online view behind.
pub fn fan_out(registry: &ConnectionRegistry, channel: &Channel, user: &str, frame: &Message) -> usize {
    let mut delivered = 0;
    for conn in registry.connections_for(channel, user) {
        match conn.send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => {
                tracing::warn!(
                    channel = channel.kind(),
                    user = %user,
                    error = %e,
                    "Write failed, pruning connection"
                );
                registry.unregister(channel, user, conn.id());
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewUser;
    use crate::store::{MessageStore, SessionDirectory, SqliteStore};
    use crate::ws::ConnectionHandle;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        store: Arc<SqliteStore>,
        registry: Arc<ConnectionRegistry>,
        engine: DeliveryEngine,
    }

    fn fixture(users: &[&str]) -> Fixture {
        let store = Arc::new(SqliteStore::new(crate::db::open_in_memory().unwrap()));
        for name in users {
            store
                .create_user(&NewUser {
                    username: name.to_string(),
                    email: format!("{name}@example.com"),
                    ..Default::default()
                })
                .unwrap();
        }
        let registry = Arc::new(ConnectionRegistry::new());
        let backend: SharedBackend = store.clone();
        let engine = DeliveryEngine::new(registry.clone(), backend);
        Fixture {
            store,
            registry,
            engine,
        }
    }

    fn connect(registry: &ConnectionRegistry, channel: &Channel, user: &str) -> UnboundedReceiver<Message> {
        let (conn, rx) = ConnectionHandle::new();
        registry.register(channel, user, conn);
        rx
    }

    fn next_json(rx: &mut UnboundedReceiver<Message>) -> serde_json::Value {
        match rx.try_recv().expect("expected a queued frame") {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_receiver_is_persisted_with_zero_writes() {
        let f = fixture(&["alice", "bob"]);

        let receipt = f
            .engine
            .deliver_direct(&OutboundMessage::new("alice", "bob", "are you there?", "message"))
            .await
            .unwrap();
        assert_eq!(receipt.delivered, 0);

        let alice = f.store.user_id_from_username("alice").unwrap();
        let bob = f.store.user_id_from_username("bob").unwrap();
        let history = f.store.direct_history(&alice, &bob).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, receipt.message_id);
    }

    #[tokio::test]
    async fn direct_message_reaches_every_receiver_connection() {
        let f = fixture(&["alice", "bob"]);
        let mut phone = connect(&f.registry, &Channel::Direct, "bob");
        let mut laptop = connect(&f.registry, &Channel::Direct, "bob");
        let mut sender = connect(&f.registry, &Channel::Direct, "alice");

        let receipt = f
            .engine
            .deliver_direct(&OutboundMessage::new("alice", "bob", "hi", "message"))
            .await
            .unwrap();
        assert_eq!(receipt.delivered, 2);

        for rx in [&mut phone, &mut laptop] {
            let payload = next_json(rx);
            assert_eq!(payload["username"], "alice");
            assert_eq!(payload["receiver"], "bob");
            assert_eq!(payload["message"], "hi");
            assert_eq!(payload["type"], "message");
        }
        assert!(sender.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_connection_is_pruned_without_aborting_the_rest() {
        let f = fixture(&["alice", "bob"]);
        let dead = connect(&f.registry, &Channel::Direct, "bob");
        let mut alive = connect(&f.registry, &Channel::Direct, "bob");
        drop(dead);

        let receipt = f
            .engine
            .deliver_direct(&OutboundMessage::new("alice", "bob", "hi", "message"))
            .await
            .unwrap();

        assert_eq!(receipt.delivered, 1);
        assert_eq!(next_json(&mut alive)["message"], "hi");
        assert_eq!(f.registry.connections_for(&Channel::Direct, "bob").len(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_skips_the_push() {
        let f = fixture(&["alice"]);
        let mut alice_rx = connect(&f.registry, &Channel::Direct, "alice");

        let err = f
            .engine
            .deliver_direct(&OutboundMessage::new("alice", "ghost", "hello?", "message"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::UnknownUser(_)));

        let err = f
            .engine
            .deliver_direct(&OutboundMessage::new("alice", "alice", "me", "message"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Invalid(_)));
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sequential_messages_arrive_in_persistence_order() {
        let f = fixture(&["alice", "bob"]);
        let mut bob = connect(&f.registry, &Channel::Direct, "bob");

        for i in 0..10 {
            f.engine
                .deliver_direct(&OutboundMessage::new("alice", "bob", format!("m{i}"), "message"))
                .await
                .unwrap();
        }

        let alice_id = f.store.user_id_from_username("alice").unwrap();
        let bob_id = f.store.user_id_from_username("bob").unwrap();
        let persisted: Vec<String> = f
            .store
            .direct_history(&alice_id, &bob_id)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        let pushed: Vec<String> = (0..10)
            .map(|_| next_json(&mut bob)["message"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(pushed, persisted);
    }

    #[tokio::test]
    async fn notification_is_persisted_and_pushed() {
        let f = fixture(&["alice", "bob"]);
        let mut bob = connect(&f.registry, &Channel::Notifications, "bob");

        let notification = f
            .engine
            .deliver_notification(OutboundNotification::new("bob", "alice", "follow_request", ""))
            .await
            .unwrap();

        let bob_id = f.store.user_id_from_username("bob").unwrap();
        let stored = f.store.notifications_for(&bob_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, notification.id);
        assert_eq!(stored[0].sender_username, "alice");

        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), bob.recv())
            .await
            .unwrap()
            .unwrap();
        let Message::Text(text) = frame else {
            panic!("expected text frame");
        };
        let event: NotificationEvent = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(event.kind, "new_notification");
        assert_eq!(event.notification.id, notification.id);
        assert_eq!(event.notification.notif_type, "follow_request");
    }

    #[tokio::test]
    async fn notification_to_unknown_user_surfaces_an_error() {
        let f = fixture(&["alice"]);

        let err = f
            .engine
            .deliver_notification(OutboundNotification::new("ghost", "alice", "message", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::UnknownUser(_)));

        // The fire-and-forget path swallows it after logging
        f.engine
            .notify(OutboundNotification::new("ghost", "alice", "message", "hi"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn group_broadcast_reaches_all_connections_and_prunes_dead_ones() {
        let f = fixture(&[]);
        let group = Channel::Group("g1".to_string());
        let mut a1 = connect(&f.registry, &group, "a");
        let mut a2 = connect(&f.registry, &group, "a");
        let mut b = connect(&f.registry, &group, "b");
        let dead = connect(&f.registry, &group, "c");
        drop(dead);

        let message = GroupMessageView {
            id: "m1".to_string(),
            group_id: "g1".to_string(),
            sender_id: "a".to_string(),
            avatar: String::new(),
            content: "hello group".to_string(),
            created_at: Utc::now(),
            username: "alice".to_string(),
        };

        assert_eq!(f.engine.broadcast_group("g1", &message), 3);
        for rx in [&mut a1, &mut a2, &mut b] {
            assert_eq!(next_json(rx)["content"], "hello group");
        }
        assert!(f.registry.connections_for(&group, "c").is_empty());
    }
}
