//! HTTP client for the main app's container webhooks.

use std::time::Duration;

use container_protocol::{PostedMessage, StreamChunk, WebhookMessagePayload};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use super::error::{MainAppError, MainAppResult};
use super::relay::Relay;
use crate::config::{AppConfig, SessionCredentials};

/// Client for one session's webhooks and relay.
#[derive(Clone)]
pub struct MainAppClient {
    client: Client,
    /// Base URL without a trailing slash (e.g. "http://main:3000").
    base_url: String,
    credentials: SessionCredentials,
    relay: Relay,
}

impl MainAppClient {
    /// Build a client for `credentials` against the URLs in `config`.
    ///
    /// Does not touch the network. Call [`MainAppClient::connect`] to open
    /// the relay.
    pub fn new(config: &AppConfig, credentials: SessionCredentials) -> MainAppResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let relay = Relay::new(relay_url(&config.main_app_ws_base_url(), &credentials));

        Ok(Self {
            client,
            base_url: config.main_app_base_url(),
            credentials,
            relay,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.credentials.session_id
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Open the relay connection if it is not already open or opening.
    pub fn connect(&self) {
        self.relay.connect();
    }

    /// Forward a live-progress chunk. Dropped silently if the relay is down.
    pub fn stream_chunk(&self, chunk: &StreamChunk) -> bool {
        debug!(kind = chunk.kind(), "Streaming chunk to main app");
        self.relay.send(chunk)
    }

    /// Persist a message in the session history.
    pub async fn post_message(&self, payload: &WebhookMessagePayload) -> MainAppResult<PostedMessage> {
        let url = format!("{}/message", self.webhook_base());
        info!(role = ?payload.role, items = payload.items.len(), "Posting message to main app");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.credentials.token)
            .json(payload)
            .send()
            .await?;

        self.handle_response(response, "message post").await
    }

    /// Full message history of the session, exactly as the main app sent it.
    pub async fn fetch_messages(&self) -> MainAppResult<Value> {
        let url = format!("{}/messages", self.webhook_base());
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.credentials.token)
            .send()
            .await?;

        self.handle_response(response, "message fetch").await
    }

    /// Close the relay and cancel any pending reconnect.
    pub fn shutdown(&self) {
        self.relay.shutdown();
    }

    fn webhook_base(&self) -> String {
        format!(
            "{}/api/container-webhooks/{}",
            self.base_url,
            urlencoding::encode(&self.credentials.session_id)
        )
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
        operation: &'static str,
    ) -> MainAppResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MainAppError::RemoteRejected {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| MainAppError::Decode(format!("{operation}: {e}")))
    }
}

fn relay_url(ws_base: &str, credentials: &SessionCredentials) -> String {
    format!(
        "{}/ws/sessions/{}?token={}&role=container",
        ws_base,
        urlencoding::encode(&credentials.session_id),
        urlencoding::encode(&credentials.token)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    type Recorded = Arc<Mutex<Vec<(String, Option<String>, Value)>>>;

    async fn record_message(
        State(recorded): State<Recorded>,
        Path(session_id): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        recorded.lock().unwrap().push((session_id, auth, body));
        (
            StatusCode::CREATED,
            Json(json!({"id": "msg_1", "createdAt": "2025-01-01T00:00:00.000Z"})),
        )
    }

    async fn list_messages(Path(session_id): Path<String>) -> Json<Value> {
        Json(json!([{
            "id": "msg_1",
            "sessionId": session_id,
            "role": "user",
            "content": "hi",
            "attachments": [],
            "items": [],
            "responderProvider": null,
            "responderModel": null,
            "responderReasoningEffort": null,
            "createdAt": "2025-01-01T00:00:00.000Z"
        }]))
    }

    async fn spawn_main_app(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(base_url: &str) -> MainAppClient {
        let config = AppConfig {
            main_app_url: base_url.to_string(),
            ..AppConfig::default()
        };
        let credentials = SessionCredentials {
            session_id: "sess_1".to_string(),
            token: "tok en".to_string(),
        };
        MainAppClient::new(&config, credentials).unwrap()
    }

    #[test]
    fn test_relay_url_encodes_credentials() {
        let credentials = SessionCredentials {
            session_id: "s/1".to_string(),
            token: "a&b".to_string(),
        };
        assert_eq!(
            relay_url("ws://main:3000", &credentials),
            "ws://main:3000/ws/sessions/s%2F1?token=a%26b&role=container"
        );
    }

    #[tokio::test]
    async fn test_post_message_sends_bearer_and_payload() {
        let recorded: Recorded = Arc::default();
        let router = Router::new()
            .route(
                "/api/container-webhooks/{session_id}/message",
                post(record_message),
            )
            .with_state(recorded.clone());
        let client = client_for(&spawn_main_app(router).await);

        let posted = client
            .post_message(&WebhookMessagePayload::user("fix bug"))
            .await
            .unwrap();
        assert_eq!(posted.id, "msg_1");

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        let (session_id, auth, body) = &recorded[0];
        assert_eq!(session_id, "sess_1");
        assert_eq!(auth.as_deref(), Some("Bearer tok en"));
        assert_eq!(body["role"], "user");
        assert_eq!(body["content"], "fix bug");
        assert_eq!(body["responderProvider"], Value::Null);
    }

    #[tokio::test]
    async fn test_fetch_messages() {
        let router = Router::new().route(
            "/api/container-webhooks/{session_id}/messages",
            axum::routing::get(list_messages),
        );
        let client = client_for(&spawn_main_app(router).await);

        let history = client.fetch_messages().await.unwrap();
        let messages: Vec<container_protocol::Message> =
            serde_json::from_value(history).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].session_id, "sess_1");
        assert_eq!(messages[0].content, "hi");
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let router = Router::new().route(
            "/api/container-webhooks/{session_id}/message",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad token") }),
        );
        let client = client_for(&spawn_main_app(router).await);

        let err = client
            .post_message(&WebhookMessagePayload::user("x"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(
            err.to_string(),
            "Main app rejected message post: 401 bad token"
        );
    }

    #[tokio::test]
    async fn test_unreachable_main_app_is_request_error() {
        let client = client_for("http://127.0.0.1:1");
        let err = client.fetch_messages().await.unwrap_err();
        assert!(matches!(err, MainAppError::Request(_)));
        assert_eq!(err.status(), None);
    }
}
