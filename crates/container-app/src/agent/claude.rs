//! Claude Code backend.
//!
//! The adapter consumes the Claude message stream through the [`ClaudeSdk`]
//! seam and resumes the session id reported by the previous turn's `result`
//! message. [`ClaudeCli`] implements the seam with `claude -p --output-format
//! stream-json`, writing the prompt to stdin so it is never read as a flag.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use container_protocol::{AgentProvider, TurnItem};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info};

use super::process::LineProcess;
use super::{AgentAdapter, AgentError, AgentTurn, ContinuationToken, TurnSink};

/// Upper bound on agentic steps per turn.
pub const MAX_STEPS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeQueryOptions {
    pub cwd: PathBuf,
    pub max_steps: u32,
    pub model: Option<String>,
    /// Session to resume.
    pub session_id: Option<String>,
}

/// Stream of raw Claude messages (`assistant`, `partial_assistant`,
/// `result`, ...).
pub type ClaudeStream = BoxStream<'static, anyhow::Result<Value>>;

#[async_trait]
pub trait ClaudeSdk: Send + Sync {
    async fn query(&self, prompt: &str, options: &ClaudeQueryOptions)
    -> anyhow::Result<ClaudeStream>;
}

pub struct ClaudeAdapter {
    sdk: Arc<dyn ClaudeSdk>,
    workspace: PathBuf,
}

impl ClaudeAdapter {
    pub fn new(sdk: Arc<dyn ClaudeSdk>, workspace: PathBuf) -> Self {
        Self { sdk, workspace }
    }

    async fn stream_turn(
        &self,
        turn: &AgentTurn,
        continuation: &mut Option<ContinuationToken>,
        sink: &mut dyn TurnSink,
    ) -> anyhow::Result<()> {
        let options = ClaudeQueryOptions {
            cwd: self.workspace.clone(),
            max_steps: MAX_STEPS,
            model: turn.model().map(str::to_string),
            session_id: continuation
                .as_ref()
                .and_then(ContinuationToken::session_id)
                .map(str::to_string),
        };
        info!(
            model = ?options.model,
            session_id = ?options.session_id,
            "Running Claude agent"
        );

        let mut messages = self.sdk.query(&turn.user_message, &options).await?;
        let mut last_assistant: Option<Value> = None;

        while let Some(message) = messages.next().await {
            let message = message?;
            match message.get("type").and_then(Value::as_str) {
                Some("assistant") => {
                    let text = extract_text(&message);
                    if !text.is_empty() {
                        sink.on_content(&text);
                    }
                    last_assistant = Some(message);
                }
                Some("partial_assistant") => {
                    if let Some(text) = extract_partial_text(&message) {
                        sink.on_content(text);
                    }
                }
                Some("result") => {
                    if let Some(id) = message
                        .get("session_id")
                        .and_then(Value::as_str)
                        .filter(|id| !id.is_empty())
                    {
                        debug!(session_id = id, "Claude session recorded");
                        *continuation = Some(ContinuationToken::Session(id.to_string()));
                    }
                }
                _ => {}
            }
        }

        if let Some(last) = last_assistant {
            sink.on_item(TurnItem::agent_message(
                assistant_message_id(&last),
                extract_text(&last),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentAdapter for ClaudeAdapter {
    fn provider(&self) -> AgentProvider {
        AgentProvider::ClaudeCodeSdk
    }

    async fn run(
        &self,
        turn: &AgentTurn,
        continuation: &mut Option<ContinuationToken>,
        sink: &mut dyn TurnSink,
    ) -> Result<(), AgentError> {
        self.stream_turn(turn, continuation, sink)
            .await
            .map_err(|e| {
                error!(error = %e, "Claude run failed");
                AgentError::Claude(e.to_string())
            })
    }
}

/// Concatenated `text` blocks of an assistant message, in order.
fn extract_text(message: &Value) -> String {
    let Some(blocks) = message.pointer("/message/content").and_then(Value::as_array) else {
        return String::new();
    };
    blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect()
}

/// Text of a partial message: `event.delta.text`, else `event.text`.
fn extract_partial_text(message: &Value) -> Option<&str> {
    let event = message.get("event")?;
    event
        .pointer("/delta/text")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .or_else(|| {
            event
                .get("text")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
        })
}

fn assistant_message_id(message: &Value) -> String {
    message
        .get("id")
        .or_else(|| message.pointer("/message/id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("claude-{}", chrono::Utc::now().timestamp_millis()))
}

/// [`ClaudeSdk`] backed by the `claude` CLI in print mode.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    executable: String,
}

impl ClaudeCli {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    fn command(&self, options: &ClaudeQueryOptions) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--max-turns")
            .arg(options.max_steps.to_string());
        if let Some(model) = &options.model {
            command.arg("--model").arg(model);
        }
        if let Some(session_id) = &options.session_id {
            command.arg("--resume").arg(session_id);
        }
        command.current_dir(&options.cwd).stdin(Stdio::piped());
        command
    }
}

#[async_trait]
impl ClaudeSdk for ClaudeCli {
    async fn query(
        &self,
        prompt: &str,
        options: &ClaudeQueryOptions,
    ) -> anyhow::Result<ClaudeStream> {
        let mut process = LineProcess::spawn("claude", self.command(options))
            .with_context(|| format!("failed to spawn {}", self.executable))?;

        if let Some(mut stdin) = process.take_stdin() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("failed to write prompt to claude")?;
            stdin.shutdown().await.context("failed to close claude stdin")?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            if let Err(e) = pump_messages(process, &tx).await {
                let _ = tx.send(Err(e));
            }
        });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

async fn pump_messages(
    mut process: LineProcess,
    tx: &mpsc::UnboundedSender<anyhow::Result<Value>>,
) -> anyhow::Result<()> {
    while let Some(line) = process.next_line().await? {
        let Ok(mut message) = serde_json::from_str::<Value>(&line) else {
            debug!(line, "Skipping non-JSON claude output");
            continue;
        };

        if message.get("type").and_then(Value::as_str) == Some("stream_event") {
            message["type"] = Value::from("partial_assistant");
        }

        let failure = (message.get("type").and_then(Value::as_str) == Some("result")
            && message.get("is_error").and_then(Value::as_bool) == Some(true))
        .then(|| {
            message
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or("claude reported an error")
                .to_string()
        });

        if tx.send(Ok(message)).is_err() {
            return Ok(());
        }
        if let Some(reason) = failure {
            bail!(reason);
        }
    }

    let status = process.wait().await?;
    if !status.success() {
        bail!("claude exited with {status}");
    }
    Ok(())
}
