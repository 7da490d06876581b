//! Chat message handlers.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use container_protocol::{AgentProvider, WebhookMessagePayload};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::agent::TurnRequest;

/// Longest accepted user message, in UTF-16 code units.
pub const MAX_CONTENT_CHARS: usize = 4000;

const INVALID_MESSAGE: &str = "Invalid message format";

/// Body of `POST /api/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    pub provider: AgentProvider,
    pub model: String,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

/// One validation problem, reported in `details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: Vec<String>,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: &[&str], message: impl Into<String>) -> Self {
        Self {
            path: path.iter().map(|p| p.to_string()).collect(),
            message: message.into(),
        }
    }
}

impl SendMessageRequest {
    pub fn from_value(value: Value) -> Result<Self, Vec<ValidationIssue>> {
        let request: Self = serde_json::from_value(value)
            .map_err(|e| vec![ValidationIssue::new(&[], e.to_string())])?;

        let length = request.content.encode_utf16().count();
        if length == 0 {
            return Err(vec![ValidationIssue::new(
                &["content"],
                "String must contain at least 1 character(s)",
            )]);
        }
        if length > MAX_CONTENT_CHARS {
            return Err(vec![ValidationIssue::new(
                &["content"],
                format!("String must contain at most {MAX_CONTENT_CHARS} character(s)"),
            )]);
        }
        Ok(request)
    }
}

#[derive(Debug, Serialize)]
pub struct SendMessageAccepted {
    pub status: &'static str,
    pub message: &'static str,
}

fn invalid(issues: Vec<ValidationIssue>) -> ApiError {
    ApiError::invalid(INVALID_MESSAGE, json!(issues))
}

/// Session history, straight from the main app.
pub async fn list_messages(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let client = state.main_app()?;
    let messages = client.fetch_messages().await.map_err(|e| {
        error!(error = %e, "Failed to fetch messages");
        ApiError::from(e)
    })?;
    Ok(Json(messages))
}

/// Persist the user message, answer 202, and run the turn in the background.
pub async fn send_message(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SendMessageAccepted>)> {
    let client = state.main_app()?.clone();

    let request = match body {
        Ok(Json(value)) => SendMessageRequest::from_value(value).map_err(invalid)?,
        Err(rejection) => {
            return Err(invalid(vec![ValidationIssue::new(
                &[],
                rejection.body_text(),
            )]));
        }
    };

    client
        .post_message(&WebhookMessagePayload::user(request.content.clone()))
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to persist user message");
            ApiError::from(e)
        })?;

    info!(
        provider = %request.provider,
        model = %request.model,
        "Message received, starting agent turn"
    );

    let turn = TurnRequest {
        provider: request.provider,
        model: request.model,
        user_message: request.content,
        reasoning_effort: request.reasoning_effort,
    };
    let coordinator = state.coordinator.clone();
    let session_id = client.session_id().to_string();
    state.turns.spawn(&session_id, async move {
        if let Err(e) = coordinator.run_turn(&client, turn).await {
            error!(error = %e, "Agent execution failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SendMessageAccepted {
            status: "processing",
            message: "Message received, agent is processing",
        }),
    ))
}
