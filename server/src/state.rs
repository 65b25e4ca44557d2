use std::sync::Arc;

use crate::chat::presence::PresenceTracker;
use crate::config::ChatConfig;
use crate::delivery::DeliveryEngine;
use crate::store::SharedBackend;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Sessions, users, message storage and group membership
    pub store: SharedBackend,
    /// Live WebSocket connections per channel
    pub connections: Arc<ConnectionRegistry>,
    pub delivery: DeliveryEngine,
    pub presence: PresenceTracker,
    /// Allowed WebSocket origins; empty allows any
    pub allowed_origins: Arc<Vec<String>>,
    pub chat: ChatConfig,
}

impl AppState {
    pub fn new(store: SharedBackend, chat: ChatConfig, allowed_origins: Vec<String>) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        Self {
            delivery: DeliveryEngine::new(connections.clone(), store.clone()),
            presence: PresenceTracker::new(connections.clone(), store.clone()),
            store,
            connections,
            allowed_origins: Arc::new(allowed_origins),
            chat,
        }
    }
}
