use axum::Router;

use crate::chat::{history, presence};
use crate::notifications;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoints (session token via cookie or ?token=)
    let ws_routes = Router::new()
        .route("/ws", axum::routing::get(ws_handler::direct_upgrade))
        .route(
            "/ws/group/{group_id}",
            axum::routing::get(ws_handler::group_upgrade),
        )
        .route(
            "/ws/notifications",
            axum::routing::get(ws_handler::notifications_upgrade),
        );

    // Authenticated routes (Session extractor validates the token)
    let api_routes = Router::new()
        .route("/api/messages", axum::routing::get(history::get_messages))
        .route("/api/presence", axum::routing::get(presence::get_presence))
        .route(
            "/api/notifications",
            axum::routing::get(notifications::list_notifications),
        )
        .route(
            "/api/notifications/read",
            axum::routing::post(notifications::mark_read),
        );

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(api_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
