//! Online/offline presence derived from the direct-message registry.
//!
//! A user is online iff they hold at least one `/ws` connection. Nothing is
//! stored: every broadcast rebuilds the view from a registry snapshot and
//! the user directory. Each event costs connected users × known users, which
//! is fine at this scale but will not survive a large deployment.

use axum::{extract::State, http::StatusCode, Json};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::delivery::fan_out;
use crate::session::Session;
use crate::state::AppState;
use crate::store::{self, SharedBackend, StoreError};
use crate::ws::protocol::{self, PresencePayload};
use crate::ws::{Channel, ConnectionRegistry};

/// Presence as seen by `viewer`: everyone online except the viewer, and
/// every other known user as offline. The viewer never appears in either
/// list.
pub fn presence_for(viewer: &str, online: &[String], all_users: &[String]) -> PresencePayload {
    let online_set: HashSet<&str> = online.iter().map(String::as_str).collect();

    let online_view = online
        .iter()
        .filter(|user| user.as_str() != viewer)
        .cloned()
        .collect();
    let offline_view = all_users
        .iter()
        .filter(|user| user.as_str() != viewer && !online_set.contains(user.as_str()))
        .cloned()
        .collect();

    PresencePayload::new(online_view, offline_view)
}

#[derive(Clone)]
pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    store: SharedBackend,
    /// One broadcast at a time, so the last view pushed is never older than
    /// the last registry change.
    gate: Arc<Mutex<()>>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<ConnectionRegistry>, store: SharedBackend) -> Self {
        Self {
            registry,
            store,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Push a fresh presence view to every connected direct-message user.
    /// Called after each register and unregister on the direct channel.
    /// Returns the number of connection writes.
    pub async fn broadcast(&self) -> usize {
        let _gate = self.gate.lock().await;
        if self.registry.online_users().is_empty() {
            return 0;
        }

        let all_users = match store::blocking(&self.store, |backend| backend.all_usernames()).await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list users for presence broadcast");
                return 0;
            }
        };

        // Snapshot after the listing so registry changes made while it ran
        // are part of this view.
        let online = self.registry.online_users();

        let mut writes = 0;
        for viewer in &online {
            let payload = presence_for(viewer, &online, &all_users);
            match protocol::text_frame(&payload) {
                Ok(frame) => writes += fan_out(&self.registry, &Channel::Direct, viewer, &frame),
                Err(e) => tracing::error!(error = %e, "Failed to encode presence"),
            }
        }

        tracing::debug!(online = online.len(), writes = writes, "Presence broadcast");
        writes
    }

    /// Current presence view for one user.
    pub async fn view_for(&self, viewer: &str) -> Result<PresencePayload, StoreError> {
        let name = viewer.to_string();
        let others =
            store::blocking(&self.store, move |backend| backend.all_usernames_except(&name)).await?;
        Ok(presence_for(viewer, &self.registry.online_users(), &others))
    }
}

/// GET /api/presence: the caller's current online/offline view.
pub async fn get_presence(
    State(state): State<AppState>,
    Session(identity): Session,
) -> Result<Json<PresencePayload>, StatusCode> {
    state
        .presence
        .view_for(&identity.username)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(user_id = %identity.user_id, error = %e, "Presence lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
