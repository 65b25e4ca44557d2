//! Session-token authentication shared by the REST and WebSocket endpoints.
//!
//! The token comes from the `token` cookie set at login; a `?token=` query
//! parameter is accepted as an equivalent for clients that cannot attach
//! cookies to a WebSocket handshake.

use axum::{
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::state::AppState;
use crate::store::{self, SharedBackend, StoreError};

pub const SESSION_COOKIE: &str = "token";

/// Authenticated user behind a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Pull the session token out of the request, cookie first.
pub fn session_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|token| !token.is_empty())
}

/// Resolve a token to the user it belongs to. `None` for unknown or expired
/// tokens and for sessions whose user no longer exists.
pub async fn identify(store: &SharedBackend, token: String) -> Result<Option<Identity>, StoreError> {
    store::blocking(store, move |backend| {
        let Some(user_id) = backend.user_id_from_token(&token)? else {
            return Ok(None);
        };
        let username = backend.username_from_user_id(&user_id)?;
        Ok(username.map(|username| Identity { user_id, username }))
    })
    .await
}

/// Extractor for endpoints that require a logged-in user.
/// Rejects with 401 when the token is missing or invalid.
#[derive(Debug, Clone)]
pub struct Session(pub Identity);

impl FromRequestParts<AppState> for Session {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(parts).ok_or(StatusCode::UNAUTHORIZED)?;

        match identify(&state.store, token).await {
            Ok(Some(identity)) => Ok(Session(identity)),
            Ok(None) => Err(StatusCode::UNAUTHORIZED),
            Err(e) => {
                tracing::error!(error = %e, "Session lookup failed");
                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}
