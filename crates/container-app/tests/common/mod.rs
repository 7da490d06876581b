//! Test utilities and common setup.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tempfile::TempDir;

use container_app::api::{self, AppState};
use container_app::config::AppConfig;

pub const SESSION_ID: &str = "sess_test";
pub const SESSION_TOKEN: &str = "secret-token";

type Recorded = Arc<Mutex<Vec<Value>>>;

#[derive(Clone, Default)]
struct FakeMainAppState {
    posts: Recorded,
    frames: Recorded,
}

/// In-process stand-in for the main app: records webhook posts and relay
/// frames.
pub struct FakeMainApp {
    pub url: String,
    posts: Recorded,
    frames: Recorded,
}

impl FakeMainApp {
    pub async fn spawn() -> Self {
        let state = FakeMainAppState::default();
        let router = Router::new()
            .route(
                "/api/container-webhooks/{session_id}/message",
                post(record_post),
            )
            .route(
                "/api/container-webhooks/{session_id}/messages",
                get(list_posts),
            )
            .route("/ws/sessions/{session_id}", get(relay_peer))
            .with_state(state.clone());

        let url = spawn_server(router).await;
        Self {
            url,
            posts: state.posts,
            frames: state.frames,
        }
    }

    pub fn posts(&self) -> Vec<Value> {
        self.posts.lock().unwrap().clone()
    }

    pub fn frames(&self) -> Vec<Value> {
        self.frames.lock().unwrap().clone()
    }
}

async fn record_post(
    State(state): State<FakeMainAppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut posts = state.posts.lock().unwrap();
    posts.push(body);
    let id = format!("msg_{}", posts.len());
    (
        StatusCode::CREATED,
        Json(json!({"id": id, "createdAt": "2025-01-01T00:00:00.000Z"})),
    )
}

async fn list_posts(
    State(state): State<FakeMainAppState>,
    UrlPath(session_id): UrlPath<String>,
) -> Json<Value> {
    let messages: Vec<Value> = state
        .posts
        .lock()
        .unwrap()
        .iter()
        .enumerate()
        .map(|(i, post)| {
            let mut message = post.clone();
            message["id"] = json!(format!("msg_{}", i + 1));
            message["sessionId"] = json!(session_id);
            message["createdAt"] = json!("2025-01-01T00:00:00.000Z");
            message
        })
        .collect();
    Json(Value::Array(messages))
}

async fn relay_peer(State(state): State<FakeMainAppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| record_frames(socket, state.frames))
}

async fn record_frames(mut socket: WebSocket, frames: Recorded) {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            WsMessage::Text(text) => {
                if let Ok(value) = serde_json::from_str(text.as_str()) {
                    frames.lock().unwrap().push(value);
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
}

/// Serve `router` on an ephemeral port; returns its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Config pointing at a temporary workspace and, optionally, a main app.
pub fn test_config(workspace: &Path, main_app_url: Option<&str>) -> AppConfig {
    let mut config = AppConfig {
        workspace_path: workspace.to_path_buf(),
        client_dist_path: workspace.join("no-dist"),
        ..AppConfig::default()
    };
    if let Some(url) = main_app_url {
        config.main_app_url = url.to_string();
        config.session_id = Some(SESSION_ID.to_string());
        config.session_token = Some(SESSION_TOKEN.to_string());
    }
    config
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub workspace: TempDir,
}

impl TestApp {
    pub fn workspace_path(&self) -> PathBuf {
        self.workspace.path().to_path_buf()
    }
}

/// Build an application around `config`. `workspace` is kept alive with it.
pub fn test_app_with(workspace: TempDir, config: AppConfig) -> TestApp {
    let state = AppState::from_config(config).unwrap();
    let router = api::create_router(state.clone());
    TestApp {
        router,
        state,
        workspace,
    }
}

/// Application with session credentials, talking to `main_app`.
pub fn test_app(main_app: &FakeMainApp) -> TestApp {
    let workspace = tempfile::tempdir().unwrap();
    let config = test_config(workspace.path(), Some(&main_app.url));
    test_app_with(workspace, config)
}

/// Application started without session credentials.
pub fn unconfigured_app() -> TestApp {
    let workspace = tempfile::tempdir().unwrap();
    let config = test_config(workspace.path(), None);
    test_app_with(workspace, config)
}

/// Poll `condition` every 20ms until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Write an executable `#!/bin/sh` script.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
