//! In-memory registry of live connections.
//!
//! Three independent partitions: direct messages and notifications are keyed
//! by username, group chat by group id then user id. A key exists only while
//! it holds at least one connection. Every mutation runs inside a single
//! DashMap entry lock, so register/unregister/snapshot for one user (or one
//! group) are mutually exclusive while other keys proceed in parallel.
//! Snapshots are copies: callers write to connections outside the lock.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use super::{ConnectionHandle, ConnectionId};

/// Which partition a connection lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Direct,
    Notifications,
    Group(String),
}

impl Channel {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Notifications => "notifications",
            Self::Group(_) => "group",
        }
    }
}

type UserConnections = DashMap<String, Vec<ConnectionHandle>>;

#[derive(Default)]
pub struct ConnectionRegistry {
    direct: UserConnections,
    notifications: UserConnections,
    groups: DashMap<String, HashMap<String, Vec<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: &Channel, user: &str, conn: ConnectionHandle) {
        let id = conn.id();
        let count = match channel {
            Channel::Direct | Channel::Notifications => {
                let mut conns = self
                    .users(channel)
                    .entry(user.to_string())
                    .or_default();
                conns.push(conn);
                conns.len()
            }
            Channel::Group(group_id) => {
                let mut members = self.groups.entry(group_id.clone()).or_default();
                let conns = members.entry(user.to_string()).or_default();
                conns.push(conn);
                conns.len()
            }
        };

        tracing::debug!(
            channel = channel.kind(),
            user = %user,
            connection = %id,
            connections = count,
            "Connection registered"
        );
    }

    /// Remove exactly the connection `id`. Returns false when it was not
    /// registered, leaving the user's other connections untouched.
    pub fn unregister(&self, channel: &Channel, user: &str, id: ConnectionId) -> bool {
        let removed = match channel {
            Channel::Direct | Channel::Notifications => {
                match self.users(channel).entry(user.to_string()) {
                    Entry::Occupied(mut entry) => {
                        let removed = remove_connection(entry.get_mut(), id);
                        if entry.get().is_empty() {
                            entry.remove();
                        }
                        removed
                    }
                    Entry::Vacant(_) => false,
                }
            }
            Channel::Group(group_id) => match self.groups.entry(group_id.clone()) {
                Entry::Occupied(mut entry) => {
                    let members = entry.get_mut();
                    let removed = match members.get_mut(user) {
                        Some(conns) => {
                            let removed = remove_connection(conns, id);
                            if conns.is_empty() {
                                members.remove(user);
                            }
                            removed
                        }
                        None => false,
                    };
                    if entry.get().is_empty() {
                        entry.remove();
                    }
                    removed
                }
                Entry::Vacant(_) => false,
            },
        };

        if removed {
            tracing::debug!(
                channel = channel.kind(),
                user = %user,
                connection = %id,
                "Connection unregistered"
            );
        }
        removed
    }

    /// Snapshot of one user's connections in registration order.
    pub fn connections_for(&self, channel: &Channel, user: &str) -> Vec<ConnectionHandle> {
        match channel {
            Channel::Direct | Channel::Notifications => self
                .users(channel)
                .get(user)
                .map(|conns| conns.value().clone())
                .unwrap_or_default(),
            Channel::Group(group_id) => self
                .groups
                .get(group_id)
                .and_then(|members| members.get(user).cloned())
                .unwrap_or_default(),
        }
    }

    /// Snapshot of every connection in a group, paired with its user id.
    pub fn group_connections(&self, group_id: &str) -> Vec<(String, ConnectionHandle)> {
        self.groups
            .get(group_id)
            .map(|members| {
                members
                    .iter()
                    .flat_map(|(user, conns)| {
                        conns.iter().map(move |conn| (user.clone(), conn.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Usernames holding at least one direct-message connection, sorted.
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.direct.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.direct.contains_key(username)
    }

    pub fn has_group(&self, group_id: &str) -> bool {
        self.groups.contains_key(group_id)
    }

    /// Register `conn` and return a guard that unregisters it when dropped.
    pub fn slot(
        self: &Arc<Self>,
        channel: Channel,
        user: &str,
        conn: ConnectionHandle,
    ) -> RegistrySlot {
        let id = conn.id();
        self.register(&channel, user, conn);
        RegistrySlot {
            registry: Arc::clone(self),
            channel,
            user: user.to_string(),
            id,
        }
    }

    fn users(&self, channel: &Channel) -> &UserConnections {
        match channel {
            Channel::Notifications => &self.notifications,
            _ => &self.direct,
        }
    }
}

fn remove_connection(conns: &mut Vec<ConnectionHandle>, id: ConnectionId) -> bool {
    let before = conns.len();
    conns.retain(|conn| conn.id() != id);
    conns.len() != before
}

/// Scoped registration. Dropping the slot (normal return, early exit or
/// unwinding) removes the connection exactly once.
pub struct RegistrySlot {
    registry: Arc<ConnectionRegistry>,
    channel: Channel,
    user: String,
    id: ConnectionId,
}

impl Drop for RegistrySlot {
    fn drop(&mut self) {
        self.registry.unregister(&self.channel, &self.user, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> ConnectionHandle {
        ConnectionHandle::new().0
    }

    #[test]
    fn register_then_unregister_removes_the_user_key() {
        let registry = ConnectionRegistry::new();
        let a = conn();

        registry.register(&Channel::Direct, "alice", a.clone());
        assert!(registry.is_online("alice"));
        assert_eq!(registry.connections_for(&Channel::Direct, "alice").len(), 1);

        assert!(registry.unregister(&Channel::Direct, "alice", a.id()));
        assert!(!registry.is_online("alice"));
        assert!(registry.connections_for(&Channel::Direct, "alice").is_empty());
    }

    #[test]
    fn unregister_removes_only_the_matching_connection() {
        let registry = ConnectionRegistry::new();
        let phone = conn();
        let laptop = conn();
        let stranger = conn();

        registry.register(&Channel::Direct, "alice", phone.clone());
        registry.register(&Channel::Direct, "alice", laptop.clone());

        // Unknown connection: no-op
        assert!(!registry.unregister(&Channel::Direct, "alice", stranger.id()));
        assert_eq!(registry.connections_for(&Channel::Direct, "alice").len(), 2);

        assert!(registry.unregister(&Channel::Direct, "alice", phone.id()));
        let remaining = registry.connections_for(&Channel::Direct, "alice");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), laptop.id());

        // Idempotent
        assert!(!registry.unregister(&Channel::Direct, "alice", phone.id()));
        assert!(registry.is_online("alice"));
    }

    #[test]
    fn membership_matches_registered_minus_unregistered() {
        let registry = ConnectionRegistry::new();
        let conns: Vec<ConnectionHandle> = (0..5).map(|_| conn()).collect();

        for c in &conns {
            registry.register(&Channel::Notifications, "bob", c.clone());
        }
        for c in conns.iter().step_by(2) {
            registry.unregister(&Channel::Notifications, "bob", c.id());
        }

        let ids: Vec<ConnectionId> = registry
            .connections_for(&Channel::Notifications, "bob")
            .iter()
            .map(|c| c.id())
            .collect();
        assert_eq!(ids, vec![conns[1].id(), conns[3].id()]);

        registry.unregister(&Channel::Notifications, "bob", conns[1].id());
        registry.unregister(&Channel::Notifications, "bob", conns[3].id());
        assert!(registry
            .connections_for(&Channel::Notifications, "bob")
            .is_empty());
        assert!(!registry.notifications.contains_key("bob"));
    }

    #[test]
    fn channels_are_independent() {
        let registry = ConnectionRegistry::new();
        let c = conn();

        registry.register(&Channel::Notifications, "alice", c.clone());
        assert!(!registry.is_online("alice"));
        assert!(registry.connections_for(&Channel::Direct, "alice").is_empty());

        // Removing from the wrong partition is a no-op
        assert!(!registry.unregister(&Channel::Direct, "alice", c.id()));
        assert_eq!(
            registry.connections_for(&Channel::Notifications, "alice").len(),
            1
        );
    }

    #[test]
    fn group_partition_is_dropped_with_its_last_connection() {
        let registry = ConnectionRegistry::new();
        let group = Channel::Group("g1".to_string());
        let a = conn();
        let b = conn();

        registry.register(&group, "user-a", a.clone());
        registry.register(&group, "user-b", b.clone());
        assert_eq!(registry.group_connections("g1").len(), 2);

        registry.unregister(&group, "user-a", a.id());
        assert!(registry.has_group("g1"));
        assert!(registry.connections_for(&group, "user-a").is_empty());

        registry.unregister(&group, "user-b", b.id());
        assert!(!registry.has_group("g1"));
        assert!(registry.group_connections("g1").is_empty());
    }

    #[test]
    fn snapshots_are_unaffected_by_later_mutation() {
        let registry = ConnectionRegistry::new();
        let a = conn();
        registry.register(&Channel::Direct, "alice", a.clone());

        let snapshot = registry.connections_for(&Channel::Direct, "alice");
        registry.unregister(&Channel::Direct, "alice", a.id());
        registry.register(&Channel::Direct, "alice", conn());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), a.id());
    }

    #[test]
    fn slot_unregisters_on_drop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let group = Channel::Group("g1".to_string());

        {
            let _slot = registry.slot(group.clone(), "user-a", conn());
            assert!(registry.has_group("g1"));
        }
        assert!(!registry.has_group("g1"));

        let direct = registry.slot(Channel::Direct, "alice", conn());
        assert_eq!(registry.online_users(), vec!["alice".to_string()]);
        drop(direct);
        assert!(registry.online_users().is_empty());
    }

    #[test]
    fn concurrent_register_unregister_leaves_no_residue() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let user = format!("user-{}", t % 3);
                    for _ in 0..200 {
                        let c = conn();
                        registry.register(&Channel::Direct, &user, c.clone());
                        registry.register(&Channel::Group("g".into()), &user, c.clone());
                        registry.unregister(&Channel::Group("g".into()), &user, c.id());
                        registry.unregister(&Channel::Direct, &user, c.id());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(registry.online_users().is_empty());
        assert!(!registry.has_group("g"));
    }
}
