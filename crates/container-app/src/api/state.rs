//! Application state shared across handlers.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::warn;

use super::error::ApiError;
use crate::agent::{AgentCoordinator, TurnTasks};
use crate::config::{AppConfig, ConfigError};
use crate::main_app::{MainAppClient, MainAppResult};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Present only when the container was provisioned with session
    /// credentials.
    pub main_app: Option<MainAppClient>,
    pub coordinator: Arc<AgentCoordinator>,
    /// Background turns launched by `POST /api/messages`.
    pub turns: TurnTasks,
    /// HTTP client for the preview proxy.
    pub http_client: Client<HttpConnector, Body>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        main_app: Option<MainAppClient>,
        coordinator: AgentCoordinator,
    ) -> Self {
        let http_client: Client<HttpConnector, Body> =
            Client::builder(TokioExecutor::new()).build_http();

        Self {
            config: Arc::new(config),
            main_app,
            coordinator: Arc::new(coordinator),
            turns: TurnTasks::new(),
            http_client,
        }
    }

    /// State with the CLI-backed agents and, when credentials are present, a
    /// main app client. Does not open the relay.
    pub fn from_config(config: AppConfig) -> MainAppResult<Self> {
        let main_app = match config.session_credentials() {
            Ok(credentials) => Some(MainAppClient::new(&config, credentials)?),
            Err(e) => {
                warn!(error = %e, "Starting without a main app connection");
                None
            }
        };
        let coordinator = AgentCoordinator::from_config(&config);
        Ok(Self::new(config, main_app, coordinator))
    }

    pub fn main_app(&self) -> Result<&MainAppClient, ApiError> {
        self.main_app
            .as_ref()
            .ok_or(ApiError::Configuration(ConfigError::MissingSessionCredentials))
    }
}

/// Reject `/api` requests when the container has no session credentials.
pub async fn require_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    state.main_app()?;
    Ok(next.run(request).await)
}
