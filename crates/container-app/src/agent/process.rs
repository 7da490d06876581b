//! Line-oriented child processes.
//!
//! Backends that run as CLIs are read one stdout line at a time. Stderr is
//! drained by a background task and logged, never interpreted.

use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct LineProcess {
    label: &'static str,
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
}

impl LineProcess {
    /// Spawn `command` with piped stdout and stderr.
    ///
    /// Stdin is left as configured by the caller. The child is killed if the
    /// handle is dropped before it exits.
    pub fn spawn(label: &'static str, mut command: Command) -> io::Result<Self> {
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other(format!("{label} process has no stdout")))?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(stderr_reader_task(label, stderr)));

        debug!(label, pid = ?child.id(), "Spawned agent process");
        Ok(Self {
            label,
            child,
            stdout: BufReader::new(stdout),
            stderr_task,
        })
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Next stdout line without its terminator, or `None` at end of stream.
    ///
    /// Invalid UTF-8 is replaced with U+FFFD rather than failing the read.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        read_lossy_line(&mut self.stdout).await
    }

    /// Wait for exit and for stderr to be fully logged.
    pub async fn wait(mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }
        debug!(label = self.label, ?status, "Agent process exited");
        Ok(status)
    }
}

async fn read_lossy_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

async fn stderr_reader_task(label: &'static str, stderr: tokio::process::ChildStderr) {
    let mut reader = BufReader::new(stderr);
    while let Ok(Some(line)) = read_lossy_line(&mut reader).await {
        if !line.trim().is_empty() {
            warn!(label, "stderr: {}", line);
        }
    }
}
