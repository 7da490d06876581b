//! Droid CLI backend.
//!
//! Runs `droid exec --output-format debug` in the workspace and interprets
//! stdout one line at a time. Lines that are not JSON are forwarded as plain
//! text.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use container_protocol::{AgentProvider, TurnItem};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::process::LineProcess;
use super::{AgentAdapter, AgentError, AgentTurn, ContinuationToken, TurnSink};

pub struct DroidAdapter {
    executable: String,
    workspace: PathBuf,
}

impl DroidAdapter {
    pub fn new(executable: impl Into<String>, workspace: PathBuf) -> Self {
        Self {
            executable: executable.into(),
            workspace,
        }
    }

    fn command(&self, turn: &AgentTurn, session_id: Option<&str>) -> Command {
        let mut command = Command::new(&self.executable);
        command.args(["exec", "--output-format", "debug"]);
        if let Some(session_id) = session_id {
            command.arg("--session-id").arg(session_id);
        }
        if let Some(model) = turn.model() {
            command.arg("--model").arg(model);
        }
        if !turn.reasoning_effort.is_empty() {
            command.arg("--reasoning-effort").arg(&turn.reasoning_effort);
        }
        command
            .arg("--skip-permissions-unsafe")
            .arg("--cwd")
            .arg(&self.workspace)
            .arg(&turn.user_message);

        command
            .current_dir(&self.workspace)
            .env("PWD", &self.workspace)
            .stdin(Stdio::null());
        command
    }
}

#[async_trait]
impl AgentAdapter for DroidAdapter {
    fn provider(&self) -> AgentProvider {
        AgentProvider::DroidCli
    }

    async fn run(
        &self,
        turn: &AgentTurn,
        continuation: &mut Option<ContinuationToken>,
        sink: &mut dyn TurnSink,
    ) -> Result<(), AgentError> {
        let session_id = continuation
            .as_ref()
            .and_then(ContinuationToken::session_id)
            .map(str::to_string);
        info!(
            executable = %self.executable,
            session_id = ?session_id,
            "Spawning Droid CLI"
        );

        let mut process = LineProcess::spawn("droid", self.command(turn, session_id.as_deref()))
            .map_err(AgentError::ProcessSpawn)?;

        while let Some(line) = process.next_line().await.map_err(AgentError::ProcessSpawn)? {
            handle_line(&line, continuation, sink);
        }

        let status = process.wait().await.map_err(AgentError::ProcessSpawn)?;
        if status.success() {
            Ok(())
        } else {
            warn!(?status, "Droid exited unsuccessfully");
            Err(AgentError::ProcessExit {
                code: status.code(),
            })
        }
    }
}

fn handle_line(line: &str, continuation: &mut Option<ContinuationToken>, sink: &mut dyn TurnSink) {
    let event: Value = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(_) => {
            sink.on_content(&format!("{line}\n"));
            return;
        }
    };

    if let Some(id) = ["session_id", "sessionId"]
        .iter()
        .find_map(|key| event.get(*key).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
    {
        debug!(session_id = id, "Droid session recorded");
        *continuation = Some(ContinuationToken::Session(id.to_string()));
    }

    let text = event
        .get("text")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty());

    match event.get("type").and_then(Value::as_str) {
        Some("text") | Some("completion") | Some("result") => {
            if let Some(text) = text {
                sink.on_content(text);
            }
        }
        Some("item") => match event.get("item").cloned().and_then(TurnItem::from_value) {
            Some(item) => sink.on_item(item),
            None => debug!("Ignoring droid item without a type"),
        },
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::{RecordingSink, turn};

    #[test]
    fn test_line_handling() {
        let mut continuation = None;
        let mut sink = RecordingSink::default();

        for line in [
            r#"{"type":"init","session_id":"d1"}"#,
            r#"{"type":"text","text":"Hel"}"#,
            r#"{"type":"text","text":""}"#,
            r#"{"type":"item","item":{"type":"file_change","path":"a.txt"}}"#,
            r#"{"type":"item","item":"bogus"}"#,
            "plain output",
            r#"{"type":"completion","text":"lo","sessionId":"d2"}"#,
            r#"{"type":"result"}"#,
        ] {
            handle_line(line, &mut continuation, &mut sink);
        }

        assert_eq!(sink.content, vec!["Hel", "plain output\n", "lo"]);
        assert_eq!(sink.items.len(), 1);
        assert_eq!(sink.items[0].kind, "file_change");
        assert_eq!(
            continuation.as_ref().and_then(ContinuationToken::session_id),
            Some("d2")
        );
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let adapter = DroidAdapter::new("/nonexistent/droid", std::env::temp_dir());
        let err = adapter
            .run(&turn("", "hi"), &mut None, &mut RecordingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ProcessSpawn(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_arguments_and_session_resume() {
        use crate::agent::test_support::write_script;

        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().canonicalize().unwrap();
        let script = write_script(
            &workspace,
            "droid",
            r#"echo "ARGS $*"
echo "PWD $PWD"
echo '{"type":"text","text":"Hello","session_id":"abc"}'
"#,
        );

        let adapter = DroidAdapter::new(script.to_string_lossy(), workspace.clone());
        let mut continuation = None;
        let mut sink = RecordingSink::default();
        adapter
            .run(&turn("m1", "fix bug"), &mut continuation, &mut sink)
            .await
            .unwrap();

        let ws = workspace.display();
        assert_eq!(
            sink.content,
            vec![
                format!(
                    "ARGS exec --output-format debug --model m1 --reasoning-effort medium \
                     --skip-permissions-unsafe --cwd {ws} fix bug\n"
                ),
                format!("PWD {ws}\n"),
                "Hello".to_string(),
            ]
        );

        let mut sink = RecordingSink::default();
        adapter
            .run(&turn("", "again"), &mut continuation, &mut sink)
            .await
            .unwrap();
        assert_eq!(
            sink.content[0],
            format!(
                "ARGS exec --output-format debug --session-id abc --reasoning-effort medium \
                 --skip-permissions-unsafe --cwd {ws} again\n"
            )
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_line_is_forwarded() {
        use crate::agent::test_support::write_script;

        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "droid",
            r#"printf 'caf\351 ok\n'
echo '{"type":"text","text":"after"}'
"#,
        );

        let adapter = DroidAdapter::new(script.to_string_lossy(), dir.path().to_path_buf());
        let mut sink = RecordingSink::default();
        adapter
            .run(&turn("", "hi"), &mut None, &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.content, vec!["caf\u{FFFD} ok\n", "after"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit() {
        use crate::agent::test_support::write_script;

        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "droid", "echo partial\nexit 2\n");

        let adapter = DroidAdapter::new(script.to_string_lossy(), dir.path().to_path_buf());
        let mut sink = RecordingSink::default();
        let err = adapter
            .run(&turn("", "hi"), &mut None, &mut sink)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Droid exited with code 2");
        assert_eq!(sink.content, vec!["partial\n"]);
    }
}
