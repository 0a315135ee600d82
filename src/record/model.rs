// src/record/model.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::TaskStatus;

/// A (possibly nested) parameter mapping. Key order is preserved.
pub type ConfigMap = Map<String, Value>;

/// Timestamp format used for `created_at`, `start_times` and `finish_times`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// The `task_info.json` document: the authoritative state of one task.
///
/// Arrays follow the run-attempt model:
/// - `pids` gets one entry per attempt, failed ones included; an entry is
///   cleared to `null` once the process is known to be gone without the
///   executor finalizing it (cancel, crash recovery).
/// - `start_times` / `finish_times` get one entry per *successful* run.
/// - `monitors` holds one metrics object per run, padded with `{}` so its
///   length matches `start_times` after every successful run.
///
/// Unknown keys are kept in `extra` so read-modify-write never drops
/// fields written by other tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub start_times: Vec<String>,
    #[serde(default)]
    pub finish_times: Vec<String>,
    #[serde(default)]
    pub pids: Vec<Option<u32>>,
    #[serde(default)]
    pub monitors: Vec<ConfigMap>,
    /// Run about to execute. Written when the task is queued so that a disk
    /// rescan between queueing and dispatch does not lose it; removed by the
    /// executor once the run has started.
    #[serde(
        rename = "_run_index",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub run_index: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskRecord {
    /// A fresh `pending` record.
    pub fn new(id: impl Into<String>, name: impl Into<String>, config: ConfigMap) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: TaskStatus::Pending,
            progress: 0.0,
            created_at: now_timestamp(),
            pinned: false,
            script: None,
            command: None,
            workdir: None,
            env: BTreeMap::new(),
            config,
            start_times: Vec::new(),
            finish_times: Vec::new(),
            pids: Vec::new(),
            monitors: Vec::new(),
            run_index: None,
            extra: Map::new(),
        }
    }

    /// Number of successful runs so far.
    pub fn successful_runs(&self) -> usize {
        self.start_times.len()
    }

    /// The run index the next attempt should use (1-based).
    ///
    /// Failed attempts do not advance it: a retry reuses the index of the
    /// attempt that failed.
    pub fn next_run_index(&self) -> u32 {
        self.successful_runs() as u32 + 1
    }

    /// Most recent non-cleared pid, if the last attempt still has one.
    pub fn latest_pid(&self) -> Option<u32> {
        self.pids.last().copied().flatten()
    }

    /// Clear the pid of the latest attempt (process known to be gone).
    pub fn clear_latest_pid(&mut self) {
        if let Some(last) = self.pids.last_mut() {
            *last = None;
        }
    }

    /// Pad `monitors` with empty slots up to `len`.
    pub fn pad_monitors(&mut self, len: usize) {
        while self.monitors.len() < len {
            self.monitors.push(ConfigMap::new());
        }
    }
}
