//! API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::ConfigError;
use crate::main_app::MainAppError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest {
        message: String,
        details: Option<Value>,
    },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),

    /// The preview target could not be reached.
    #[error("{message}")]
    BadGateway { message: String, details: String },

    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest {
            message: msg.into(),
            details: None,
        }
    }

    pub fn invalid(msg: impl Into<String>, details: Value) -> Self {
        Self::BadRequest {
            message: msg.into(),
            details: Some(details),
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn bad_gateway(msg: impl Into<String>, details: impl Into<String>) -> Self {
        Self::BadGateway {
            message: msg.into(),
            details: details.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) | Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::BadGateway { .. } => "BAD_GATEWAY",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Structured error response.
///
/// `error` carries the human-readable message, except for gateway errors
/// where it is the literal `BadGateway` and the message moves to `message`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        match &self {
            ApiError::Internal(msg) => error!(error_code = code, message = %msg, "API error"),
            ApiError::Configuration(e) => error!(error_code = code, message = %e, "API error"),
            ApiError::BadGateway { message, details } => {
                warn!(error_code = code, message = %message, details = %details, "Upstream unreachable")
            }
            _ => debug!(error_code = code, message = %self, "Client error"),
        }

        let body = match self {
            ApiError::BadGateway { message, details } => ErrorResponse {
                error: "BadGateway".to_string(),
                code,
                message: Some(message),
                details: Some(Value::String(details)),
            },
            ApiError::BadRequest { message, details } => ErrorResponse {
                error: message,
                code,
                message: None,
                details,
            },
            other => ErrorResponse {
                error: other.to_string(),
                code,
                message: None,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<MainAppError> for ApiError {
    fn from(err: MainAppError) -> Self {
        Self::Internal(err.to_string())
    }
}
