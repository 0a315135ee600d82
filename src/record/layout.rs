// src/record/layout.rs

//! On-disk layout of the task root.
//!
//! ```text
//! <root>/
//!   runpool.toml              optional settings
//!   .trash/                   deleted task directories
//!   <task name>/
//!     task_info.json          TaskRecord
//!     config.yaml             resolved config for the script
//!     run_logs/
//!       run1.log, run2.log    one file per attempt
//!       error.log             cumulative log of failed runs
//! ```

use std::path::{Path, PathBuf};

pub const INFO_FILENAME: &str = "task_info.json";
pub const CONFIG_FILENAME: &str = "config.yaml";
pub const RUN_LOG_DIR: &str = "run_logs";
pub const ERROR_LOG_FILENAME: &str = "error.log";
pub const TRASH_DIR: &str = ".trash";

/// Env var pointing the child at its config file.
pub const ENV_CONFIG: &str = "RUNPOOL_CONFIG";
/// Env var naming the task directory of the running child.
pub const ENV_TASK_DIR: &str = "RUNPOOL_TASK_DIR";
/// Env var carrying the 1-based run index of the running child.
pub const ENV_RUN_INDEX: &str = "RUNPOOL_RUN_INDEX";

pub fn info_path(task_dir: &Path) -> PathBuf {
    task_dir.join(INFO_FILENAME)
}

pub fn config_path(task_dir: &Path) -> PathBuf {
    task_dir.join(CONFIG_FILENAME)
}

pub fn run_log_dir(task_dir: &Path) -> PathBuf {
    task_dir.join(RUN_LOG_DIR)
}

/// `run_logs/run<N>.log`, `run_index` being 1-based.
pub fn run_log_path(task_dir: &Path, run_index: u32) -> PathBuf {
    run_log_dir(task_dir).join(format!("run{run_index}.log"))
}

pub fn error_log_path(task_dir: &Path) -> PathBuf {
    run_log_dir(task_dir).join(ERROR_LOG_FILENAME)
}

pub fn trash_dir(root: &Path) -> PathBuf {
    root.join(TRASH_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_logs_are_one_based_files() {
        let dir = Path::new("/tasks/exp");
        assert_eq!(
            run_log_path(dir, 3),
            PathBuf::from("/tasks/exp/run_logs/run3.log")
        );
        assert_eq!(
            error_log_path(dir),
            PathBuf::from("/tasks/exp/run_logs/error.log")
        );
    }
}
