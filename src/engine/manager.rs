// src/engine/manager.rs

//! Thread-safe task manager.
//!
//! Wraps the pure [`TaskTable`] in a mutex and persists each transition to
//! the task's `task_info.json`. The lock is only held to read or mutate the
//! table; every disk or process call happens after it is released. Public
//! operations report failure as `false` / `None` / a count and log the
//! cause, they never return errors. The exception is task creation, which
//! surfaces batch syntax problems to the caller.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::bus::LogBus;
use crate::engine::TaskOutcome;
use crate::engine::core::{Dispatch, PoolConfig, Task, TaskTable};
use crate::engine::recovery::scan_root;
use crate::errors::Result;
use crate::exec::process::kill_process;
use crate::factory::{TaskFactory, TaskOptions};
use crate::record::layout::trash_dir;
use crate::record::{ConfigMap, TaskRecord, load_record, update_record};
use crate::types::{ExecutionMode, TaskStatus};

#[derive(Clone)]
pub struct TaskManager {
    shared: Arc<Shared>,
}

struct Shared {
    root: PathBuf,
    table: Mutex<TaskTable>,
    wake: Notify,
    bus: LogBus,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("root", &self.shared.root)
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Open the task root (created if missing) and load it with recovery.
    pub fn open(root: impl Into<PathBuf>, pool: PoolConfig, bus: LogBus) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let manager = Self {
            shared: Arc::new(Shared {
                root,
                table: Mutex::new(TaskTable::new(pool)),
                wake: Notify::new(),
                bus,
            }),
        };
        manager.scan_disk();
        Ok(manager)
    }

    fn lock(&self) -> MutexGuard<'_, TaskTable> {
        self.shared
            .table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wake the control loop.
    fn wake(&self) {
        self.shared.wake.notify_one();
    }

    /// Resolves on the next state change that may allow admission.
    pub async fn changed(&self) {
        self.shared.wake.notified().await
    }

    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    pub fn bus(&self) -> &LogBus {
        &self.shared.bus
    }

    // ---- queries -------------------------------------------------------

    /// Snapshot of every record, oldest first.
    pub fn tasks(&self) -> Vec<TaskRecord> {
        self.lock().tasks().iter().map(|t| t.record.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<TaskRecord> {
        self.lock().get(id).map(|t| t.record.clone())
    }

    pub fn task_dir(&self, id: &str) -> Option<PathBuf> {
        self.lock().get(id).map(|t| t.dir.clone())
    }

    /// Resolve a user reference: exact id, exact name, then unique id
    /// prefix.
    pub fn find(&self, query: &str) -> Option<TaskRecord> {
        let table = self.lock();
        let tasks = table.tasks();
        if let Some(t) = tasks
            .iter()
            .find(|t| t.record.id == query || t.record.name == query)
        {
            return Some(t.record.clone());
        }
        let mut prefixed = tasks.iter().filter(|t| t.record.id.starts_with(query));
        match (prefixed.next(), prefixed.next()) {
            (Some(t), None) if !query.is_empty() => Some(t.record.clone()),
            _ => None,
        }
    }

    pub fn running_count(&self) -> usize {
        self.lock().running_count()
    }

    pub fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    pub fn pool(&self) -> PoolConfig {
        self.lock().pool()
    }

    // ---- control -------------------------------------------------------

    pub fn set_pool(&self, mode: ExecutionMode, max_workers: usize) {
        self.lock().set_pool(mode, max_workers);
        self.wake();
    }

    pub fn is_processing(&self) -> bool {
        self.lock().is_processing()
    }

    /// Allow (or stop) admission of queued tasks.
    pub fn set_processing(&self, processing: bool) {
        self.lock().set_processing(processing);
        self.wake();
    }

    /// Queue the given tasks. Returns how many were queued.
    pub fn enqueue(&self, ids: &[String]) -> usize {
        let queued: Vec<(String, PathBuf, u32)> = {
            let mut table = self.lock();
            ids.iter()
                .filter_map(|id| table.enqueue(id).map(|(dir, idx)| (id.clone(), dir, idx)))
                .collect()
        };

        for (id, dir, run_index) in &queued {
            persist_queued(dir, *run_index);
            debug!(task_id = %id, run_index, "task queued");
        }
        if !queued.is_empty() {
            self.wake();
        }
        queued.len()
    }

    /// Queue a finished task for another run.
    pub fn rerun(&self, id: &str) -> bool {
        let Some((dir, run_index)) = self.lock().rerun(id) else {
            return false;
        };
        persist_queued(&dir, run_index);
        info!(task_id = %id, run_index, "task queued for rerun");
        self.wake();
        true
    }

    /// Cancel a queued or running task. A running task's process is
    /// signalled; the record is failed either way.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(canceled) = self.lock().cancel(id) else {
            return false;
        };

        if canceled.was_running {
            // The executor writes pids; the in-memory copy may lag behind.
            let pid = load_record(&canceled.dir).ok().and_then(|r| r.latest_pid());
            match pid {
                Some(pid) => {
                    if let Err(e) = kill_process(pid) {
                        warn!(task_id = %id, pid, error = %e, "failed to kill task process");
                    }
                }
                None => debug!(task_id = %id, "no pid recorded yet; executor will stop the run"),
            }
        }

        let persisted = update_record(&canceled.dir, |r| {
            r.status = TaskStatus::Failed;
            r.progress = 0.0;
            r.run_index = None;
            if canceled.was_running {
                r.clear_latest_pid();
            }
        });
        if let Err(e) = persisted {
            warn!(task_id = %id, error = %format!("{e:#}"), "could not persist cancel");
        }

        info!(task_id = %id, was_running = canceled.was_running, "task canceled");
        self.wake();
        true
    }

    /// Remove a task and move its directory into `.trash`. Running tasks
    /// must be canceled first.
    pub fn delete(&self, id: &str) -> bool {
        let task = {
            let mut table = self.lock();
            let busy = match table.get(id) {
                Some(t) => t.status() == TaskStatus::Running || table.is_owned(id),
                None => return false,
            };
            if busy {
                return false;
            }
            table.remove(id)
        };
        let Some(task) = task else {
            return false;
        };

        match move_to_trash(&self.shared.root, &task.dir) {
            Ok(dest) => {
                info!(task = %task.record.name, dest = ?dest, "task moved to trash");
                true
            }
            Err(e) => {
                warn!(task = %task.record.name, error = %e, "could not move task to trash");
                self.lock().insert(task);
                false
            }
        }
    }

    pub fn set_pinned(&self, id: &str, pinned: bool) -> bool {
        let Some(dir) = self.lock().set_pinned(id, pinned) else {
            return false;
        };
        persist(&dir, id, |r| r.pinned = pinned)
    }

    pub fn set_env(&self, id: &str, env: BTreeMap<String, String>) -> bool {
        let Some(dir) = self.lock().set_env(id, env.clone()) else {
            return false;
        };
        persist(&dir, id, move |r| r.env = env)
    }

    /// Create tasks on disk and add them to the table as `pending`.
    pub fn create_tasks(
        &self,
        configs: Vec<ConfigMap>,
        prefix: &str,
        options: &TaskOptions,
    ) -> Result<Vec<TaskRecord>> {
        let created = TaskFactory::new(&self.shared.root).create(configs, prefix, options)?;
        let records: Vec<TaskRecord> = created.iter().map(|c| c.record.clone()).collect();
        let mut table = self.lock();
        for c in created {
            table.insert(Task {
                record: c.record,
                dir: c.dir,
            });
        }
        Ok(records)
    }

    // ---- runtime hooks -------------------------------------------------

    /// Admit the next queued task, if a slot is free.
    pub fn pick_next(&self) -> Option<Dispatch> {
        self.lock().pick_next()
    }

    /// The pool refused `id`: fail it.
    pub fn revert_dispatch(&self, id: &str) {
        let Some(dir) = self.lock().revert_dispatch(id) else {
            return;
        };
        persist(&dir, id, |r| {
            r.status = TaskStatus::Failed;
            r.progress = 0.0;
            r.run_index = None;
        });
        self.wake();
    }

    /// Reconcile a returned worker with the record the executor wrote.
    pub fn on_task_done(&self, id: &str, result: &std::result::Result<TaskOutcome, String>) {
        let dir = self.task_dir(id);
        let disk = dir.as_deref().and_then(|d| match load_record(d) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(task_id = %id, error = %format!("{e:#}"), "could not re-read record");
                None
            }
        });

        let forced = self.lock().finish(id, disk, result.is_err());
        match result {
            Ok(outcome) => debug!(task_id = %id, ?outcome, "task finished"),
            Err(msg) => warn!(task_id = %id, error = %msg, "worker failed"),
        }

        if let (true, Some(dir)) = (forced, dir) {
            persist(&dir, id, |r| {
                r.status = TaskStatus::Failed;
                r.progress = 0.0;
                r.run_index = None;
            });
        }
        self.wake();
    }

    /// Re-read queued and running records to pick up executor progress.
    pub fn refresh_from_disk(&self) {
        let active: Vec<PathBuf> = self
            .lock()
            .tasks()
            .iter()
            .filter(|t| t.status().is_active())
            .map(|t| t.dir.clone())
            .collect();

        let records: Vec<TaskRecord> = active
            .iter()
            .filter_map(|dir| load_record(dir).ok())
            .collect();

        let mut table = self.lock();
        for record in records {
            table.mirror(record);
        }
    }

    /// Rebuild the table from disk, recovering orphaned runs. Returns the
    /// number of tasks loaded.
    pub fn scan_disk(&self) -> usize {
        let owned = self.lock().running_ids();
        let tasks = scan_root(&self.shared.root, &owned);
        let count = tasks.len();
        self.lock().replace_all(tasks);
        debug!(root = ?self.shared.root, count, "scanned task root");
        self.wake();
        count
    }
}

fn persist_queued(dir: &Path, run_index: u32) {
    let res = update_record(dir, |r| {
        r.status = TaskStatus::Queued;
        r.progress = 0.0;
        r.run_index = Some(run_index);
        r.clear_latest_pid();
    });
    if let Err(e) = res {
        warn!(dir = ?dir, error = %format!("{e:#}"), "could not persist queued state");
    }
}

fn persist<F>(dir: &Path, id: &str, f: F) -> bool
where
    F: FnOnce(&mut TaskRecord),
{
    match update_record(dir, f) {
        Ok(_) => true,
        Err(e) => {
            warn!(task_id = %id, error = %format!("{e:#}"), "could not persist task update");
            false
        }
    }
}

/// Move `dir` under `<root>/.trash`, suffixing a timestamp on collision.
fn move_to_trash(root: &Path, dir: &Path) -> std::io::Result<PathBuf> {
    let trash = trash_dir(root);
    fs::create_dir_all(&trash)?;
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "task".to_string());

    let mut dest = trash.join(&name);
    if dest.exists() {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        dest = trash.join(format!("{name}_{stamp}"));
    }
    if dest.exists() {
        let millis = chrono::Local::now().timestamp_millis();
        dest = trash.join(format!("{name}_{millis}"));
    }
    fs::rename(dir, &dest)?;
    Ok(dest)
}
