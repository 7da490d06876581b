//! Main app client error types.

use thiserror::Error;

/// Result type for main app operations.
pub type MainAppResult<T> = Result<T, MainAppError>;

/// Errors that can occur while talking to the main app.
#[derive(Debug, Error)]
pub enum MainAppError {
    /// The main app answered with a non-2xx status.
    #[error("Main app rejected {operation}: {status} {body}")]
    RemoteRejected {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// HTTP request failed before a response arrived.
    #[error("HTTP request to main app failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response body did not match the expected shape.
    #[error("Failed to parse main app response: {0}")]
    Decode(String),
}

impl MainAppError {
    /// HTTP status carried by a `RemoteRejected` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            MainAppError::RemoteRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}
