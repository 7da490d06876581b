//! Agent turns.
//!
//! A turn routes one user message to one backend, streams what the backend
//! produces to the main app, and persists the final assistant message.
//!
//! Each backend is an [`AgentAdapter`]. Adapters are stateless; conversation
//! continuity lives in a [`ContinuationToken`] owned by the coordinator and
//! handed to the adapter for the duration of a run.

mod claude;
mod codex;
mod coordinator;
mod droid;
mod error;
mod process;
mod tasks;

use std::sync::Arc;

use async_trait::async_trait;
use container_protocol::{AgentProvider, TurnItem};

pub use claude::{ClaudeAdapter, ClaudeCli, ClaudeQueryOptions, ClaudeSdk, ClaudeStream};
pub use codex::{
    CodexAdapter, CodexEvent, CodexEventStream, CodexExec, CodexSdk, CodexThread,
    CodexThreadOptions, SandboxMode,
};
pub use coordinator::{AgentCoordinator, TurnOutcome, TurnPublisher, TurnRequest};
pub use droid::DroidAdapter;
pub use error::{AgentError, TurnError};
pub use tasks::TurnTasks;

/// Reasoning effort used when the request does not name one.
pub const DEFAULT_REASONING_EFFORT: &str = "medium";

/// Inputs of one backend run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTurn {
    /// Model identifier; empty means the backend default.
    pub model: String,
    pub user_message: String,
    pub reasoning_effort: String,
}

impl AgentTurn {
    pub fn model(&self) -> Option<&str> {
        Some(self.model.as_str()).filter(|m| !m.is_empty())
    }
}

/// Receives what a backend produces, in order.
pub trait TurnSink: Send {
    /// An assistant text fragment.
    fn on_content(&mut self, fragment: &str);
    /// A completed turn item.
    fn on_item(&mut self, item: TurnItem);
}

/// Backend-specific handle that lets the next turn continue the
/// conversation.
#[derive(Clone)]
pub enum ContinuationToken {
    /// Live Codex thread, reused across turns.
    Thread(Arc<dyn CodexThread>),
    /// Resumable session id (Claude, Droid).
    Session(String),
}

impl ContinuationToken {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ContinuationToken::Session(id) => Some(id),
            ContinuationToken::Thread(_) => None,
        }
    }
}

impl std::fmt::Debug for ContinuationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContinuationToken::Thread(thread) => {
                f.debug_tuple("Thread").field(&thread.id()).finish()
            }
            ContinuationToken::Session(id) => f.debug_tuple("Session").field(id).finish(),
        }
    }
}

/// One agent backend.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    fn provider(&self) -> AgentProvider;

    /// Run `turn` to completion, reporting output through `sink`.
    ///
    /// `continuation` holds the token left by the previous run of this
    /// backend in the same session; the adapter replaces it when the backend
    /// reports a new one. A token of the wrong variant is treated as absent.
    async fn run(
        &self,
        turn: &AgentTurn,
        continuation: &mut Option<ContinuationToken>,
        sink: &mut dyn TurnSink,
    ) -> Result<(), AgentError>;
}

/// Adapters for every provider, wired to the binaries in `config`.
pub fn default_adapters(config: &crate::config::AppConfig) -> Vec<Arc<dyn AgentAdapter>> {
    vec![
        Arc::new(CodexAdapter::new(
            Arc::new(CodexExec::from_config(config)),
            config.workspace_path.clone(),
        )),
        Arc::new(ClaudeAdapter::new(
            Arc::new(ClaudeCli::new(config.claude_path.clone())),
            config.workspace_path.clone(),
        )),
        Arc::new(DroidAdapter::new(
            config.droid_path.clone(),
            config.workspace_path.clone(),
        )),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Sink that records everything it receives.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub content: Vec<String>,
        pub items: Vec<TurnItem>,
    }

    impl RecordingSink {
        pub fn text(&self) -> String {
            self.content.concat()
        }
    }

    impl TurnSink for RecordingSink {
        fn on_content(&mut self, fragment: &str) {
            self.content.push(fragment.to_string());
        }

        fn on_item(&mut self, item: TurnItem) {
            self.items.push(item);
        }
    }

    pub fn turn(model: &str, message: &str) -> AgentTurn {
        AgentTurn {
            model: model.to_string(),
            user_message: message.to_string(),
            reasoning_effort: DEFAULT_REASONING_EFFORT.to_string(),
        }
    }

    /// Write an executable `sh` script standing in for an agent CLI.
    #[cfg(unix)]
    pub fn write_script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}
