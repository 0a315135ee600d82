// src/engine/core.rs

//! Pure task table.
//!
//! Holds the in-memory copy of every task, the set of ids currently owned
//! by a worker, and the pool configuration. No IO happens here: the
//! [`TaskManager`](super::TaskManager) performs disk writes around these
//! transitions, outside its lock.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::record::TaskRecord;
use crate::types::{ExecutionMode, TaskStatus};

/// One task: its record and its directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub record: TaskRecord,
    pub dir: PathBuf,
}

impl Task {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn status(&self) -> TaskStatus {
        self.record.status
    }
}

/// A task picked for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub task_id: String,
    pub name: String,
    pub dir: PathBuf,
    pub run_index: u32,
}

/// Result of a successful cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canceled {
    pub dir: PathBuf,
    pub was_running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub mode: ExecutionMode,
    pub max_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            max_workers: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct TaskTable {
    /// Creation order, oldest first.
    tasks: Vec<Task>,
    running: HashSet<String>,
    processing: bool,
    pool: PoolConfig,
}

impl TaskTable {
    pub fn new(pool: PoolConfig) -> Self {
        Self {
            pool,
            ..Self::default()
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id() == id)
    }

    pub fn pool(&self) -> PoolConfig {
        self.pool
    }

    pub fn set_pool(&mut self, mode: ExecutionMode, max_workers: usize) {
        self.pool = PoolConfig {
            mode,
            max_workers: max_workers.max(1),
        };
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn set_processing(&mut self, processing: bool) {
        self.processing = processing;
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn running_ids(&self) -> HashSet<String> {
        self.running.clone()
    }

    pub fn is_owned(&self, id: &str) -> bool {
        self.running.contains(id)
    }

    pub fn queued_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Queued)
            .count()
    }

    /// Nothing owned by a worker and nothing that will be admitted.
    pub fn is_idle(&self) -> bool {
        self.running.is_empty() && (!self.processing || self.queued_count() == 0)
    }

    /// Append a freshly created task.
    pub fn insert(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Replace every task with a fresh scan, keeping tasks owned by a
    /// worker in their in-memory state.
    pub fn replace_all(&mut self, scanned: Vec<Task>) {
        let mut rebuilt = Vec::with_capacity(scanned.len());
        for task in scanned {
            match self.get(task.id()) {
                Some(current) if self.running.contains(task.id()) => {
                    rebuilt.push(merge_owned(current, task.record));
                }
                _ => rebuilt.push(task),
            }
        }
        self.tasks = rebuilt;
    }

    /// Mirror a record read from disk into the in-memory copy.
    ///
    /// A stale active disk state never revives a task that is already
    /// terminal in memory (e.g. canceled between the read and the mirror).
    pub fn mirror(&mut self, record: TaskRecord) -> bool {
        let owned = self.running.contains(&record.id);
        let Some(task) = self.get_mut(&record.id) else {
            return false;
        };
        if !owned && task.status().is_terminal() && record.status.is_active() {
            return false;
        }
        *task = if owned {
            merge_owned(task, record)
        } else {
            Task {
                record,
                dir: task.dir.clone(),
            }
        };
        true
    }

    /// `pending | failed | completed → queued`. Returns the run index
    /// chosen for the next attempt.
    pub fn enqueue(&mut self, id: &str) -> Option<(PathBuf, u32)> {
        let owned = self.running.contains(id);
        let task = self.get_mut(id)?;
        match task.status() {
            TaskStatus::Pending | TaskStatus::Failed | TaskStatus::Completed if !owned => {
                Some(queue(task))
            }
            _ => None,
        }
    }

    /// `failed | completed → queued`.
    pub fn rerun(&mut self, id: &str) -> Option<(PathBuf, u32)> {
        let owned = self.running.contains(id);
        let task = self.get_mut(id)?;
        if task.status().is_terminal() && !owned {
            Some(queue(task))
        } else {
            None
        }
    }

    /// Pick the oldest queued task if a worker slot is free, flip it to
    /// `running` and take ownership of it.
    pub fn pick_next(&mut self) -> Option<Dispatch> {
        if !self.processing || self.running.len() >= self.pool.max_workers {
            return None;
        }
        let running = &self.running;
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.status() == TaskStatus::Queued && !running.contains(t.id()))?;

        let run_index = task
            .record
            .run_index
            .take()
            .unwrap_or_else(|| task.record.next_run_index());
        task.record.status = TaskStatus::Running;
        task.record.progress = 0.0;

        let dispatch = Dispatch {
            task_id: task.record.id.clone(),
            name: task.record.name.clone(),
            dir: task.dir.clone(),
            run_index,
        };
        self.running.insert(dispatch.task_id.clone());
        Some(dispatch)
    }

    /// Undo a dispatch the pool refused: the task fails.
    pub fn revert_dispatch(&mut self, id: &str) -> Option<PathBuf> {
        self.running.remove(id);
        let task = self.get_mut(id)?;
        task.record.status = TaskStatus::Failed;
        task.record.progress = 0.0;
        Some(task.dir.clone())
    }

    /// `queued | running → failed`.
    pub fn cancel(&mut self, id: &str) -> Option<Canceled> {
        let task = self.get_mut(id)?;
        let was_running = match task.status() {
            TaskStatus::Queued => false,
            TaskStatus::Running => true,
            _ => return None,
        };
        task.record.status = TaskStatus::Failed;
        task.record.progress = 0.0;
        task.record.run_index = None;
        if was_running {
            task.record.clear_latest_pid();
        }
        Some(Canceled {
            dir: task.dir.clone(),
            was_running,
        })
    }

    /// A worker returned. Mirrors `disk` when available; if the worker
    /// errored and the task still looks active, forces `failed`.
    ///
    /// Returns whether the failure was forced (and needs persisting).
    pub fn finish(&mut self, id: &str, disk: Option<TaskRecord>, worker_error: bool) -> bool {
        self.running.remove(id);
        if let Some(record) = disk {
            self.mirror(record);
        }
        let Some(task) = self.get_mut(id) else {
            return false;
        };
        if worker_error && task.status().is_active() {
            task.record.status = TaskStatus::Failed;
            task.record.progress = 0.0;
            task.record.run_index = None;
            return true;
        }
        false
    }

    pub fn remove(&mut self, id: &str) -> Option<Task> {
        let pos = self.tasks.iter().position(|t| t.id() == id)?;
        self.running.remove(id);
        Some(self.tasks.remove(pos))
    }

    pub fn set_pinned(&mut self, id: &str, pinned: bool) -> Option<PathBuf> {
        let task = self.get_mut(id)?;
        task.record.pinned = pinned;
        Some(task.dir.clone())
    }

    pub fn set_env(
        &mut self,
        id: &str,
        env: std::collections::BTreeMap<String, String>,
    ) -> Option<PathBuf> {
        let task = self.get_mut(id)?;
        task.record.env = env;
        Some(task.dir.clone())
    }
}

fn queue(task: &mut Task) -> (PathBuf, u32) {
    let run_index = task.record.next_run_index();
    task.record.status = TaskStatus::Queued;
    task.record.progress = 0.0;
    task.record.run_index = Some(run_index);
    task.record.clear_latest_pid();
    (task.dir.clone(), run_index)
}

/// Disk copy of a task a worker owns. The executor may not have written
/// `running` yet, so a disk status of `queued`/`pending` must not undo the
/// dispatch.
fn merge_owned(current: &Task, mut disk: TaskRecord) -> Task {
    if matches!(disk.status, TaskStatus::Queued | TaskStatus::Pending) {
        disk.status = current.record.status;
        disk.progress = current.record.progress;
        disk.run_index = None;
    }
    Task {
        record: disk,
        dir: current.dir.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ConfigMap;

    fn task(id: &str, status: TaskStatus) -> Task {
        let mut record = TaskRecord::new(id, id, ConfigMap::new());
        record.status = status;
        Task {
            record,
            dir: PathBuf::from(format!("/root/{id}")),
        }
    }

    fn table(tasks: Vec<Task>, max_workers: usize) -> TaskTable {
        let mut t = TaskTable::new(PoolConfig {
            mode: ExecutionMode::Thread,
            max_workers,
        });
        for task in tasks {
            t.insert(task);
        }
        t.set_processing(true);
        t
    }

    #[test]
    fn picks_oldest_queued_within_limit() {
        let mut t = table(
            vec![
                task("a", TaskStatus::Pending),
                task("b", TaskStatus::Pending),
                task("c", TaskStatus::Pending),
            ],
            1,
        );
        for id in ["c", "a", "b"] {
            assert_eq!(t.enqueue(id).map(|(_, idx)| idx), Some(1));
        }

        let first = t.pick_next().unwrap();
        assert_eq!(first.task_id, "a");
        assert_eq!(first.run_index, 1);
        assert!(t.pick_next().is_none(), "limit of one worker");

        t.finish("a", None, false);
        assert_eq!(t.pick_next().unwrap().task_id, "b");
    }

    #[test]
    fn not_processing_admits_nothing() {
        let mut t = table(vec![task("a", TaskStatus::Queued)], 4);
        t.set_processing(false);
        assert!(t.pick_next().is_none());
        assert!(t.is_idle());
    }

    #[test]
    fn rerun_only_from_terminal_states() {
        let mut t = table(
            vec![task("p", TaskStatus::Pending), task("c", TaskStatus::Completed)],
            1,
        );
        assert!(t.rerun("p").is_none());

        let c = t.tasks.iter_mut().find(|x| x.id() == "c").unwrap();
        c.record.start_times = vec!["t1".into(), "t2".into()];
        assert_eq!(t.rerun("c").map(|(_, idx)| idx), Some(3));
        assert_eq!(t.get("c").unwrap().status(), TaskStatus::Queued);
    }

    #[test]
    fn cancel_before_dispatch_never_runs() {
        let mut t = table(vec![task("a", TaskStatus::Pending)], 1);
        t.enqueue("a").unwrap();
        let canceled = t.cancel("a").unwrap();
        assert!(!canceled.was_running);
        assert!(t.pick_next().is_none());
        assert_eq!(t.get("a").unwrap().status(), TaskStatus::Failed);
        assert!(t.cancel("a").is_none());
    }

    #[test]
    fn owned_task_is_not_reverted_by_stale_disk_state() {
        let mut t = table(vec![task("a", TaskStatus::Pending)], 1);
        t.enqueue("a").unwrap();
        t.pick_next().unwrap();

        let mut stale = t.get("a").unwrap().record.clone();
        stale.status = TaskStatus::Queued;
        stale.run_index = Some(1);
        t.mirror(stale);

        assert_eq!(t.get("a").unwrap().status(), TaskStatus::Running);
        assert!(t.pick_next().is_none());
    }

    #[test]
    fn worker_error_forces_failed() {
        let mut t = table(vec![task("a", TaskStatus::Pending)], 1);
        t.enqueue("a").unwrap();
        t.pick_next().unwrap();
        assert!(t.finish("a", None, true));
        assert_eq!(t.get("a").unwrap().status(), TaskStatus::Failed);
        assert_eq!(t.running_count(), 0);
    }

    #[test]
    fn dispatch_failure_reverts_to_failed() {
        let mut t = table(vec![task("a", TaskStatus::Pending)], 1);
        t.enqueue("a").unwrap();
        t.pick_next().unwrap();
        assert!(t.revert_dispatch("a").is_some());
        assert_eq!(t.get("a").unwrap().status(), TaskStatus::Failed);
        assert_eq!(t.running_count(), 0);
    }
}
