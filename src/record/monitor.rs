// src/record/monitor.rs

//! Metrics callback used from inside a running task.
//!
//! A script reports metrics for its current run; repeated calls during the
//! same run merge into the same object. Outside a runpool-launched process
//! (no `RUNPOOL_CONFIG` in the environment) reporting is a no-op.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, RunpoolError};
use crate::record::layout::{ENV_CONFIG, ENV_RUN_INDEX};
use crate::record::store::update_record;

const MAX_ATTEMPTS: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Merge `data` into `monitors[run_index - 1]` of the task in `task_dir`,
/// padding earlier slots with empty objects.
///
/// `data` must be a JSON object. Transient read/parse failures (the executor
/// may be replacing the record) are retried a few times.
pub async fn add_monitor(task_dir: &Path, run_index: u32, data: &Value) -> Result<()> {
    let Value::Object(fields) = data else {
        return Err(RunpoolError::ConfigError(
            "monitor data must be a mapping of key/value pairs".to_string(),
        ));
    };
    if fields.is_empty() {
        return Ok(());
    }

    let slot = run_index.max(1) as usize;
    let mut last_err = None;

    for attempt in 1..=MAX_ATTEMPTS {
        let result = update_record(task_dir, |rec| {
            rec.pad_monitors(slot);
            let entry = &mut rec.monitors[slot - 1];
            for (k, v) in fields {
                entry.insert(k.clone(), v.clone());
            }
        });

        match result {
            Ok(_) => {
                debug!(task_dir = ?task_dir, run_index = slot, "merged monitor data");
                return Ok(());
            }
            Err(e) => {
                debug!(attempt, error = %e, "monitor update failed; retrying");
                last_err = Some(e);
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }

    let err = last_err.unwrap_or_else(|| anyhow::anyhow!("monitor update failed"));
    warn!(task_dir = ?task_dir, error = %err, "giving up on monitor update");
    Err(RunpoolError::Other(err))
}

/// [`add_monitor`] driven by the environment the executor sets up.
///
/// Returns `Ok(false)` without touching anything when not running under the
/// executor.
pub async fn add_monitor_from_env(data: &Value) -> Result<bool> {
    if !data.is_object() {
        return Err(RunpoolError::ConfigError(
            "monitor data must be a mapping of key/value pairs".to_string(),
        ));
    }

    let Some(config_path) = std::env::var_os(ENV_CONFIG) else {
        return Ok(false);
    };
    let config_path = PathBuf::from(config_path);
    let Some(task_dir) = config_path.parent() else {
        return Ok(false);
    };

    let run_index = std::env::var(ENV_RUN_INDEX)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(1);

    add_monitor(task_dir, run_index, data).await?;
    Ok(true)
}
