//! Turn orchestration.
//!
//! The coordinator routes a turn to its adapter, forwards everything the
//! adapter produces to the main app as stream chunks, and persists exactly
//! one assistant message per turn: the accumulated reply on success, an
//! `Error: ...` message on failure.
//!
//! Continuation tokens are kept per session and per provider. Turns of the
//! same session are serialized by a per-session lock held for the whole turn.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use container_protocol::{
    AgentProvider, PostedMessage, Responder, StreamChunk, TurnItem, WebhookMessagePayload,
};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::{
    AgentAdapter, AgentError, AgentTurn, ContinuationToken, DEFAULT_REASONING_EFFORT, TurnError,
    TurnSink, default_adapters,
};
use crate::config::AppConfig;
use crate::main_app::{MainAppClient, MainAppError};

/// Where a turn's output goes.
#[async_trait]
pub trait TurnPublisher: Send + Sync {
    fn session_id(&self) -> &str;

    /// Best-effort live progress. Must not block or fail.
    fn stream_chunk(&self, chunk: &StreamChunk);

    async fn post_message(
        &self,
        payload: &WebhookMessagePayload,
    ) -> Result<PostedMessage, MainAppError>;
}

#[async_trait]
impl TurnPublisher for MainAppClient {
    fn session_id(&self) -> &str {
        MainAppClient::session_id(self)
    }

    fn stream_chunk(&self, chunk: &StreamChunk) {
        MainAppClient::stream_chunk(self, chunk);
    }

    async fn post_message(
        &self,
        payload: &WebhookMessagePayload,
    ) -> Result<PostedMessage, MainAppError> {
        MainAppClient::post_message(self, payload).await
    }
}

/// One user message addressed to one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub provider: AgentProvider,
    /// Empty means the backend default.
    pub model: String,
    pub user_message: String,
    /// Defaults to `medium`.
    pub reasoning_effort: Option<String>,
}

/// Result of a successful turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The persisted assistant message.
    pub message: PostedMessage,
    pub content: String,
    pub items: Vec<TurnItem>,
}

type SessionContinuations = Arc<Mutex<HashMap<AgentProvider, ContinuationToken>>>;

pub struct AgentCoordinator {
    adapters: HashMap<AgentProvider, Arc<dyn AgentAdapter>>,
    sessions: DashMap<String, SessionContinuations>,
}

impl AgentCoordinator {
    pub fn new(adapters: impl IntoIterator<Item = Arc<dyn AgentAdapter>>) -> Self {
        Self {
            adapters: adapters
                .into_iter()
                .map(|adapter| (adapter.provider(), adapter))
                .collect(),
            sessions: DashMap::new(),
        }
    }

    /// Coordinator with the CLI-backed adapter for every provider.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(default_adapters(config))
    }

    fn session(&self, session_id: &str) -> SessionContinuations {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Whether `provider` has a continuation token for `session_id`.
    pub async fn has_continuation(&self, session_id: &str, provider: AgentProvider) -> bool {
        let Some(session) = self.sessions.get(session_id).map(|s| s.clone()) else {
            return false;
        };
        let tokens = session.lock().await;
        tokens.contains_key(&provider)
    }

    /// Run one turn to completion and persist its outcome.
    ///
    /// On failure an error message has already been posted (best effort) when
    /// this returns `Err`.
    pub async fn run_turn(
        &self,
        publisher: &dyn TurnPublisher,
        request: TurnRequest,
    ) -> Result<TurnOutcome, TurnError> {
        let reasoning_effort = request
            .reasoning_effort
            .filter(|effort| !effort.is_empty())
            .unwrap_or_else(|| DEFAULT_REASONING_EFFORT.to_string());
        let responder = Responder {
            provider: request.provider.as_str().to_string(),
            model: request.model.clone(),
            reasoning_effort: reasoning_effort.clone(),
        };
        let turn = AgentTurn {
            model: request.model,
            user_message: request.user_message,
            reasoning_effort,
        };

        info!(
            session_id = publisher.session_id(),
            provider = %request.provider,
            model = %turn.model,
            "Running agent"
        );

        let session = self.session(publisher.session_id());
        let mut tokens = session.lock().await;

        let mut collector = TurnCollector::new(publisher);
        let run = match self.adapters.get(&request.provider) {
            Some(adapter) => {
                let mut continuation = tokens.remove(&request.provider);
                let run = adapter.run(&turn, &mut continuation, &mut collector).await;
                if let Some(token) = continuation {
                    tokens.insert(request.provider, token);
                }
                run
            }
            None => Err(AgentError::UnknownProvider(request.provider.to_string())),
        };
        let (content, items) = collector.finish();

        let result = match run {
            Ok(()) => {
                publisher.stream_chunk(&StreamChunk::Complete);
                let payload =
                    WebhookMessagePayload::assistant(content.clone(), items.clone(), &responder);
                publisher
                    .post_message(&payload)
                    .await
                    .map(|message| TurnOutcome {
                        message,
                        content,
                        items,
                    })
                    .map_err(TurnError::from)
            }
            Err(e) => Err(TurnError::from(e)),
        };

        match result {
            Ok(outcome) => {
                info!(message_id = %outcome.message.id, "Agent completed successfully");
                Ok(outcome)
            }
            Err(e) => {
                report_failure(publisher, &e, &responder).await;
                Err(e)
            }
        }
    }
}

async fn report_failure(publisher: &dyn TurnPublisher, failure: &TurnError, responder: &Responder) {
    let message = failure.to_string();
    error!(error = %message, "Agent error");

    let payload = WebhookMessagePayload::assistant(
        format!("Error: {message}"),
        vec![TurnItem::error(message.clone())],
        responder,
    );
    if let Err(e) = publisher.post_message(&payload).await {
        error!(error = %e, "Failed to post error message to main app");
    }
}

/// Accumulates a turn's output while streaming it.
struct TurnCollector<'a> {
    publisher: &'a dyn TurnPublisher,
    content: String,
    items: Vec<TurnItem>,
}

impl<'a> TurnCollector<'a> {
    fn new(publisher: &'a dyn TurnPublisher) -> Self {
        Self {
            publisher,
            content: String::new(),
            items: Vec::new(),
        }
    }

    fn finish(self) -> (String, Vec<TurnItem>) {
        (self.content, self.items)
    }
}

impl TurnSink for TurnCollector<'_> {
    fn on_content(&mut self, fragment: &str) {
        self.content.push_str(fragment);
        self.publisher.stream_chunk(&StreamChunk::content(fragment));
    }

    fn on_item(&mut self, item: TurnItem) {
        self.publisher
            .stream_chunk(&StreamChunk::Item { item: item.clone() });
        self.items.push(item);
    }
}
