#![allow(dead_code)]

use std::path::{Path, PathBuf};

use serde_json::Value;

use runpool::record::layout::run_log_dir;
use runpool::record::{ConfigMap, TaskRecord, save_record};
use runpool::types::TaskStatus;

/// `json!({...})` → `ConfigMap`. Panics on non-objects.
pub fn config_map(value: Value) -> ConfigMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Builder writing a task directory straight to disk, bypassing the
/// factory, for setting up arbitrary record states.
pub struct TaskDirBuilder {
    root: PathBuf,
    record: TaskRecord,
}

impl TaskDirBuilder {
    pub fn new(root: &Path, name: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            record: TaskRecord::new(format!("id-{name}"), name, ConfigMap::new()),
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.record.id = id.to_string();
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.record.status = status;
        self
    }

    pub fn created_at(mut self, ts: &str) -> Self {
        self.record.created_at = ts.to_string();
        self
    }

    pub fn config(mut self, config: Value) -> Self {
        self.record.config = config_map(config);
        self
    }

    pub fn command(mut self, cmd: &str) -> Self {
        self.record.command = Some(cmd.to_string());
        self
    }

    pub fn script(mut self, script: &str) -> Self {
        self.record.script = Some(script.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.record.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn pid(mut self, pid: Option<u32>) -> Self {
        self.record.pids.push(pid);
        self
    }

    pub fn run_index(mut self, idx: u32) -> Self {
        self.record.run_index = Some(idx);
        self
    }

    /// Add a successful past run with its monitor slot.
    pub fn completed_run(mut self, monitor: Value) -> Self {
        let n = self.record.start_times.len() + 1;
        self.record.start_times.push(format!("2026-01-0{n} 10:00:00"));
        self.record.finish_times.push(format!("2026-01-0{n} 11:00:00"));
        self.record.pids.push(None);
        self.record.monitors.push(config_map(monitor));
        self
    }

    pub fn record(&self) -> &TaskRecord {
        &self.record
    }

    /// Write `task_info.json` and `run_logs/`; returns the task directory.
    pub fn write(self) -> PathBuf {
        let dir = self.root.join(&self.record.name);
        std::fs::create_dir_all(run_log_dir(&dir)).expect("create task dir");
        save_record(&dir, &self.record).expect("write record");
        dir
    }
}
