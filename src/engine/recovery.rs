// src/engine/recovery.rs

//! Disk scan with crash recovery.
//!
//! A record that says `running` while no worker of this process owns it and
//! its latest pid is gone was orphaned by a controller crash: it is failed
//! and its stale pid cleared, on disk and in the returned copy.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::engine::core::Task;
use crate::exec::process::pid_alive;
use crate::record::layout::{TRASH_DIR, info_path};
use crate::record::{load_record, save_record};
use crate::types::TaskStatus;

/// Load every task under `root`, oldest first, recovering orphaned runs.
///
/// `owned` holds the ids currently dispatched to a worker; those are never
/// recovered. Unreadable directories are skipped with a warning.
pub fn scan_root(root: &Path, owned: &HashSet<String>) -> Vec<Task> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(root = ?root, error = %e, "task root not readable");
            return Vec::new();
        }
    };

    let mut tasks: Vec<Task> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| path.file_name().is_some_and(|n| n != TRASH_DIR))
        .filter(|path| info_path(path).is_file())
        .filter_map(|dir| match load_record(&dir) {
            Ok(record) => Some(Task { record, dir }),
            Err(e) => {
                warn!(dir = ?dir, error = %format!("{e:#}"), "skipping unreadable task");
                None
            }
        })
        .collect();

    for task in &mut tasks {
        if !owned.contains(task.id()) {
            recover_orphan(task);
        }
    }

    // Timestamps have one-second resolution, so a batch usually shares one.
    tasks.sort_by(|a, b| {
        a.record
            .created_at
            .cmp(&b.record.created_at)
            .then_with(|| batch_position(&a.record.name).cmp(&batch_position(&b.record.name)))
            .then_with(|| a.record.name.cmp(&b.record.name))
    });
    tasks
}

fn batch_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.*)-\[(\d+)-of-\d+\]$")
            .unwrap_or_else(|e| panic!("invalid batch name pattern: {e}"))
    })
}

/// `exp-[3-of-12]` orders as `("exp", 3)`; other names as `(name, 0)`.
fn batch_position(name: &str) -> (&str, u64) {
    batch_name_re()
        .captures(name)
        .and_then(|caps| {
            let stem = caps.get(1)?.as_str();
            let index = caps.get(2)?.as_str().parse().ok()?;
            Some((stem, index))
        })
        .unwrap_or((name, 0))
}

fn recover_orphan(task: &mut Task) {
    if task.status() != TaskStatus::Running {
        return;
    }
    let pid = task.record.latest_pid();
    if pid.is_some_and(pid_alive) {
        return;
    }

    warn!(
        task = %task.record.name,
        task_id = %task.record.id,
        ?pid,
        "running task has no live process; marking failed"
    );
    task.record.status = TaskStatus::Failed;
    task.record.progress = 0.0;
    task.record.run_index = None;
    task.record.clear_latest_pid();

    if let Err(e) = save_record(&task.dir, &task.record) {
        warn!(task = %task.record.name, error = %format!("{e:#}"), "could not persist recovery");
    }
}
