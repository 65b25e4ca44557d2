//! Shared helpers for the integration tests: boot the real router on an
//! ephemeral port backed by a temporary SQLite database.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use social_net_server::config::ChatConfig;
use social_net_server::db::models::{MembershipStatus, NewUser};
use social_net_server::store::{SharedBackend, SqliteStore};
use social_net_server::ws::ConnectionRegistry;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
    pub store: Arc<SqliteStore>,
    pub connections: Arc<ConnectionRegistry>,
    _data_dir: tempfile::TempDir,
}

pub struct TestUser {
    pub id: String,
    pub username: String,
    pub token: String,
}

/// Start the server on a random port.
pub async fn start_test_server() -> TestServer {
    start_test_server_with(ChatConfig::default()).await
}

/// Start the server with custom chat limits and keep-alive timings.
pub async fn start_test_server_with(chat: ChatConfig) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = social_net_server::db::init_db(&data_dir).expect("Failed to init DB");
    let store = Arc::new(SqliteStore::new(db));
    let backend: SharedBackend = store.clone();

    let state = social_net_server::state::AppState::new(backend, chat, Vec::new());
    let connections = state.connections.clone();

    let app = social_net_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        base_url: format!("http://{}", addr),
        store,
        connections,
        _data_dir: tmp_dir,
    }
}

impl TestServer {
    /// Insert a user and open a session for them.
    pub fn seed_user(&self, username: &str) -> TestUser {
        let id = self
            .store
            .create_user(&NewUser {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                first_name: username.to_string(),
                ..Default::default()
            })
            .expect("Failed to create user");
        let token = self
            .store
            .create_session(&id, chrono::Duration::hours(1))
            .expect("Failed to create session");
        TestUser {
            id,
            username: username.to_string(),
            token,
        }
    }

    /// Create a group owned by `owner` with `members` accepted.
    pub fn seed_group(&self, owner: &TestUser, members: &[&TestUser]) -> String {
        let group_id = self
            .store
            .create_group(&owner.id, "Test group", "")
            .expect("Failed to create group");
        for member in members {
            self.store
                .set_membership(&group_id, &member.id, MembershipStatus::Accepted)
                .expect("Failed to add member");
        }
        group_id
    }

    /// Open a WebSocket with the session token in the `token` cookie.
    pub async fn connect(&self, path: &str, token: &str) -> WsStream {
        let mut request = format!("ws://{}{}", self.addr, path)
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert("Cookie", format!("token={token}").parse().unwrap());
        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .expect("WebSocket handshake failed");
        ws
    }

    pub fn get(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        reqwest::Client::new()
            .get(format!("{}{}", self.base_url, path))
            .header("Cookie", format!("token={token}"))
    }

    pub fn post(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        reqwest::Client::new()
            .post(format!("{}{}", self.base_url, path))
            .header("Cookie", format!("token={token}"))
    }

    /// Poll the notifications endpoint until `count` notifications exist.
    /// Notification delivery is asynchronous to the triggering message.
    pub async fn wait_for_notifications(&self, user: &TestUser, count: usize) -> Vec<Value> {
        for _ in 0..50 {
            let resp = self.get("/api/notifications", &user.token).send().await.unwrap();
            assert_eq!(resp.status(), 200);
            let list: Vec<Value> = resp.json().await.unwrap();
            if list.len() >= count {
                return list;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {count} notifications for {}", user.username);
    }
}

pub async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("Failed to send frame");
}

/// Next JSON text frame, skipping control frames. Panics after 2 seconds.
pub async fn next_json(ws: &mut WsStream) -> Value {
    next_json_within(ws, Duration::from_secs(2)).await
}

/// Next JSON text frame, skipping control frames. Panics after `wait`.
pub async fn next_json_within(ws: &mut WsStream, wait: Duration) -> Value {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let frame = tokio::time::timeout_at(deadline, ws.next())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Stream ended")
            .expect("WebSocket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Read frames until one satisfies `pred`, discarding the rest.
pub async fn next_json_matching(ws: &mut WsStream, pred: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..20 {
        let value = next_json(ws).await;
        if pred(&value) {
            return value;
        }
    }
    panic!("no matching frame arrived");
}

/// Wait for a presence update whose online list is exactly `online`.
pub async fn expect_presence(ws: &mut WsStream, online: &[&str]) -> Value {
    next_json_matching(ws, |v| {
        v["type"] == "presence"
            && v["online"]
                .as_array()
                .map(|list| list.iter().map(|u| u.as_str().unwrap_or("")).eq(online.iter().copied()))
                .unwrap_or(false)
    })
    .await
}

/// Assert nothing but presence updates arrive within `ms`.
pub async fn expect_no_message(ws: &mut WsStream, ms: u64) {
    loop {
        match tokio::time::timeout(Duration::from_millis(ms), ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(value["type"], "presence", "unexpected payload: {value}");
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(other) => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Expect one error payload followed by a close frame with `code`.
pub async fn expect_rejection(ws: &mut WsStream, error: &str, code: u16) {
    let payload = next_json(ws).await;
    assert_eq!(payload, serde_json::json!({ "error": error }));

    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Timed out waiting for close")
        .expect("Stream ended before close frame");
    match frame {
        Ok(Message::Close(Some(close))) => assert_eq!(u16::from(close.code), code),
        other => panic!("expected close frame, got {other:?}"),
    }
}

/// Poll `cond` until it holds or a second passes.
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..50 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
