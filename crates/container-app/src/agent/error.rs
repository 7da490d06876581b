//! Agent error types.

use thiserror::Error;

use crate::main_app::MainAppError;

/// Failure of a single backend run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Codex SDK error: {0}")]
    Codex(String),

    #[error("Claude SDK error: {0}")]
    Claude(String),

    /// The droid subprocess ended with a non-zero status, or was killed by a
    /// signal (`code` is `None`).
    #[error("Droid exited with code {}", exit_code_label(.code))]
    ProcessExit { code: Option<i32> },

    /// The subprocess could not be started or its pipes failed.
    #[error("{0}")]
    ProcessSpawn(#[source] std::io::Error),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "null".to_string(), |c| c.to_string())
}

/// Failure of a whole turn: the backend run or the persistence of its result.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Persist(#[from] MainAppError),
}
