//! Detached turn tasks.
//!
//! The message endpoint answers before the turn finishes, so turns run as
//! background tasks. They are tracked here so shutdown can wait for them and
//! abort whatever is left.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

struct TaskEntry {
    session_id: String,
    abort: AbortHandle,
}

/// Removes its task's entry when the task ends, including by panic or abort.
struct EntryGuard {
    tasks: Arc<DashMap<u64, TaskEntry>>,
    id: u64,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        self.tasks.remove(&self.id);
        if std::thread::panicking() {
            warn!(task_id = self.id, "Turn task panicked");
        } else {
            debug!(task_id = self.id, "Turn task finished");
        }
    }
}

#[derive(Clone, Default)]
pub struct TurnTasks {
    tasks: Arc<DashMap<u64, TaskEntry>>,
    next_id: Arc<AtomicU64>,
}

impl TurnTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `future` in the background on behalf of `session_id`.
    pub fn spawn<F>(&self, session_id: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let tasks = Arc::clone(&self.tasks);

        let handle = tokio::spawn(async move {
            // Wait for the entry to exist so the guard cannot remove it early.
            let _ = registered_rx.await;
            let _guard = EntryGuard { tasks, id };
            future.await;
        });

        self.tasks.insert(
            id,
            TaskEntry {
                session_id: session_id.to_string(),
                abort: handle.abort_handle(),
            },
        );
        let _ = registered_tx.send(());
    }

    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    pub fn active_for(&self, session_id: &str) -> usize {
        self.tasks
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .count()
    }

    /// Wait until no task is running, or `timeout` elapses.
    ///
    /// Returns `true` when idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.active() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    /// Abort every running task. Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let ids: Vec<u64> = self.tasks.iter().map(|entry| *entry.key()).collect();
        let mut aborted = 0;
        for id in ids {
            if let Some((_, entry)) = self.tasks.remove(&id) {
                entry.abort.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!(aborted, "Aborted in-flight agent turns");
        }
        aborted
    }
}
