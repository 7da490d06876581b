//! Codex backend.
//!
//! The adapter talks to Codex through the [`CodexSdk`] seam: a thread is
//! started on the first turn of a session and reused for every later turn.
//! [`CodexExec`] implements the seam on top of `codex exec --experimental-json`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

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
use crate::config::AppConfig;

/// Filesystem policy Codex runs its tools under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxMode {
    WorkspaceWrite,
    DangerFullAccess,
}

impl SandboxMode {
    /// Windows has no workspace sandbox, so Codex gets full access there.
    pub fn for_platform() -> Self {
        if cfg!(windows) {
            SandboxMode::DangerFullAccess
        } else {
            SandboxMode::WorkspaceWrite
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxMode::WorkspaceWrite => "workspace-write",
            SandboxMode::DangerFullAccess => "danger-full-access",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexThreadOptions {
    pub model: Option<String>,
    pub sandbox_mode: SandboxMode,
    pub working_directory: PathBuf,
    pub skip_git_repo_check: bool,
}

/// Event produced by a streamed Codex run.
#[derive(Debug, Clone, PartialEq)]
pub enum CodexEvent {
    Text(String),
    Item(TurnItem),
}

pub type CodexEventStream = BoxStream<'static, anyhow::Result<CodexEvent>>;

/// A Codex conversation that keeps its context between runs.
#[async_trait]
pub trait CodexThread: Send + Sync {
    /// Thread id, once Codex has assigned one.
    fn id(&self) -> Option<String>;

    async fn run_streamed(&self, prompt: &str) -> anyhow::Result<CodexEventStream>;
}

pub trait CodexSdk: Send + Sync {
    fn start_thread(&self, options: CodexThreadOptions) -> Arc<dyn CodexThread>;
}

pub struct CodexAdapter {
    sdk: Arc<dyn CodexSdk>,
    workspace: PathBuf,
}

impl CodexAdapter {
    pub fn new(sdk: Arc<dyn CodexSdk>, workspace: PathBuf) -> Self {
        Self { sdk, workspace }
    }

    fn thread_options(&self, turn: &AgentTurn) -> CodexThreadOptions {
        CodexThreadOptions {
            model: turn.model().map(str::to_string),
            sandbox_mode: SandboxMode::for_platform(),
            working_directory: self.workspace.clone(),
            skip_git_repo_check: true,
        }
    }

    async fn stream_turn(
        &self,
        turn: &AgentTurn,
        continuation: &mut Option<ContinuationToken>,
        sink: &mut dyn TurnSink,
    ) -> anyhow::Result<()> {
        let thread = match continuation {
            Some(ContinuationToken::Thread(thread)) => {
                info!(thread_id = ?thread.id(), "Resuming Codex thread");
                Arc::clone(thread)
            }
            _ => {
                let thread = self.sdk.start_thread(self.thread_options(turn));
                info!(thread_id = ?thread.id(), "Started new Codex thread");
                *continuation = Some(ContinuationToken::Thread(Arc::clone(&thread)));
                thread
            }
        };

        let mut events = thread.run_streamed(&turn.user_message).await?;
        while let Some(event) = events.next().await {
            match event? {
                CodexEvent::Text(text) => sink.on_content(&text),
                CodexEvent::Item(item) => sink.on_item(item),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AgentAdapter for CodexAdapter {
    fn provider(&self) -> AgentProvider {
        AgentProvider::CodexSdk
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
                error!(error = %e, "Codex run failed");
                AgentError::Codex(e.to_string())
            })
    }
}

/// [`CodexSdk`] backed by the `codex` CLI.
#[derive(Debug, Clone)]
pub struct CodexExec {
    executable: String,
    api_key: Option<String>,
    base_url: Option<String>,
}

impl CodexExec {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            api_key: None,
            base_url: None,
        }
    }

    /// Binary from `CODEX_PATH` (default `codex`), credentials from
    /// `CODEX_API_KEY` and `CODEX_BASE_URL`.
    pub fn from_config(config: &AppConfig) -> Self {
        let executable = config
            .codex_path
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "codex".to_string());
        Self {
            executable,
            api_key: config.codex_api_key.clone().filter(|k| !k.is_empty()),
            base_url: config.codex_base_url.clone().filter(|u| !u.is_empty()),
        }
    }

    fn command(&self, options: &CodexThreadOptions, resume: Option<&str>) -> Command {
        let mut command = Command::new(&self.executable);
        command.arg("exec").arg("--experimental-json");
        if let Some(model) = &options.model {
            command.arg("--model").arg(model);
        }
        command
            .arg("--sandbox")
            .arg(options.sandbox_mode.as_str())
            .arg("--cd")
            .arg(&options.working_directory);
        if options.skip_git_repo_check {
            command.arg("--skip-git-repo-check");
        }
        if let Some(thread_id) = resume {
            command.arg("resume").arg(thread_id);
        }

        if let Some(key) = &self.api_key {
            command.env("CODEX_API_KEY", key);
        }
        if let Some(url) = &self.base_url {
            command.env("OPENAI_BASE_URL", url);
        }
        command.stdin(Stdio::piped());
        command
    }
}

impl CodexSdk for CodexExec {
    fn start_thread(&self, options: CodexThreadOptions) -> Arc<dyn CodexThread> {
        Arc::new(ExecThread {
            exec: self.clone(),
            options,
            thread_id: Arc::new(Mutex::new(None)),
        })
    }
}

struct ExecThread {
    exec: CodexExec,
    options: CodexThreadOptions,
    thread_id: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl CodexThread for ExecThread {
    fn id(&self) -> Option<String> {
        self.thread_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn run_streamed(&self, prompt: &str) -> anyhow::Result<CodexEventStream> {
        let resume = self.id();
        let command = self.exec.command(&self.options, resume.as_deref());
        let mut process = LineProcess::spawn("codex", command)
            .with_context(|| format!("failed to spawn {}", self.exec.executable))?;

        if let Some(mut stdin) = process.take_stdin() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("failed to write prompt to codex")?;
            stdin.shutdown().await.context("failed to close codex stdin")?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let thread_id = Arc::clone(&self.thread_id);
        tokio::spawn(async move {
            if let Err(e) = pump_events(process, &thread_id, &tx).await {
                let _ = tx.send(Err(e));
            }
        });

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

async fn pump_events(
    mut process: LineProcess,
    thread_id: &Mutex<Option<String>>,
    tx: &mpsc::UnboundedSender<anyhow::Result<CodexEvent>>,
) -> anyhow::Result<()> {
    while let Some(line) = process.next_line().await? {
        match parse_exec_line(&line) {
            ExecLine::ThreadStarted(id) => {
                debug!(thread_id = %id, "Codex assigned thread id");
                *thread_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
            }
            ExecLine::Events(events) => {
                for event in events {
                    if tx.send(Ok(event)).is_err() {
                        return Ok(());
                    }
                }
            }
            ExecLine::Failed(message) => bail!(message),
            ExecLine::Ignored => {}
        }
    }

    let status = process.wait().await?;
    if !status.success() {
        bail!("codex exited with {status}");
    }
    Ok(())
}

/// Meaning of one `--experimental-json` output line.
#[derive(Debug, PartialEq)]
enum ExecLine {
    ThreadStarted(String),
    Events(Vec<CodexEvent>),
    Failed(String),
    Ignored,
}

fn parse_exec_line(line: &str) -> ExecLine {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => {
            debug!(line, "Skipping non-JSON codex output");
            return ExecLine::Ignored;
        }
    };
    let str_field = |key: &str| value.get(key).and_then(Value::as_str);

    match str_field("type") {
        Some("thread.started") => str_field("thread_id")
            .map(|id| ExecLine::ThreadStarted(id.to_string()))
            .unwrap_or(ExecLine::Ignored),
        Some("text") => match str_field("text") {
            Some(text) if !text.is_empty() => {
                ExecLine::Events(vec![CodexEvent::Text(text.to_string())])
            }
            _ => ExecLine::Ignored,
        },
        Some("item") => value
            .get("item")
            .cloned()
            .and_then(TurnItem::from_value)
            .map(|item| ExecLine::Events(vec![CodexEvent::Item(item)]))
            .unwrap_or(ExecLine::Ignored),
        Some("item.completed") => {
            let Some(item) = value.get("item").cloned().and_then(TurnItem::from_value) else {
                return ExecLine::Ignored;
            };
            let mut events = Vec::with_capacity(2);
            let message_text = (item.kind == "agent_message")
                .then(|| item.get("text").and_then(Value::as_str))
                .flatten()
                .filter(|text| !text.is_empty());
            if let Some(text) = message_text {
                events.push(CodexEvent::Text(text.to_string()));
            }
            events.push(CodexEvent::Item(item));
            ExecLine::Events(events)
        }
        Some("turn.failed") => ExecLine::Failed(
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("turn failed")
                .to_string(),
        ),
        Some("error") => ExecLine::Failed(str_field("message").unwrap_or("unknown error").to_string()),
        _ => ExecLine::Ignored,
    }
}
