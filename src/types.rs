use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How dispatched tasks are executed by the worker pool.
///
/// - `Thread`: each run is driven by a Tokio task inside the controller
///   process. The actual work happens in the child process, so the worker
///   only waits on it and pumps its output (default).
/// - `Process`: each run is handed to a fresh `runpool worker` OS process.
///   Stronger isolation, but everything dispatched must be serializable and
///   live output is only available through the run log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Thread,
    Process,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Thread
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "thread" => Ok(ExecutionMode::Thread),
            "process" => Ok(ExecutionMode::Process),
            other => Err(format!(
                "invalid execution_mode: {other} (expected \"thread\" or \"process\")"
            )),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Thread => f.write_str("thread"),
            ExecutionMode::Process => f.write_str("process"),
        }
    }
}

/// Persisted lifecycle state of a task.
///
/// `pending → queued → running → completed | failed`, with
/// `completed | failed → queued` on rerun and `queued | running → failed`
/// on cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// `completed` or `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// `queued` or `running`: the task holds (or waits for) a worker slot.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
