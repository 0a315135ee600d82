// src/exec/error_log.rs

//! Migration of failed run logs into the cumulative `error.log`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::record::layout::{error_log_path, run_log_dir, run_log_path};
use crate::record::now_timestamp;

const REMOVE_ATTEMPTS: u32 = 5;
const REMOVE_BACKOFF: Duration = Duration::from_millis(50);

const RULE: &str = "============================================================";

/// Why a run ended up in the error log.
#[derive(Debug, Clone, Copy)]
pub enum Failure<'a> {
    /// The process ran and exited unsuccessfully (`-1`: no exit code).
    Exit(i32),
    /// The executor itself failed.
    Internal(&'a str),
}

fn banner(run_index: u32, failure: Failure<'_>) -> String {
    let headline = match failure {
        Failure::Exit(code) => format!("Run #{run_index} FAILED (exit code {code})"),
        Failure::Internal(msg) => format!("Run #{run_index} INTERNAL ERROR: {msg}"),
    };
    format!("\n{RULE}\n[{}] {headline}\n{RULE}\n", now_timestamp())
}

/// Append `run<N>.log` to `error.log` behind a banner, then delete it.
///
/// A missing run log still produces the banner.
pub async fn migrate_failed_run(task_dir: &Path, run_index: u32, failure: Failure<'_>) -> Result<()> {
    let run_log = run_log_path(task_dir, run_index);
    let content = match fs::read(&run_log).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e).with_context(|| format!("reading {:?}", run_log)),
    };

    fs::create_dir_all(run_log_dir(task_dir)).await?;
    let error_log = error_log_path(task_dir);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&error_log)
        .await
        .with_context(|| format!("opening {:?}", error_log))?;
    file.write_all(banner(run_index, failure).as_bytes()).await?;
    file.write_all(&content).await?;
    if !content.ends_with(b"\n") {
        file.write_all(b"\n").await?;
    }
    file.flush().await?;
    drop(file);

    remove_with_retry(&run_log).await;
    debug!(dir = ?task_dir, run_index, "failed run log migrated");
    Ok(())
}

/// Delete `path`, retrying with growing backoff while something else still
/// holds it.
async fn remove_with_retry(path: &Path) {
    for attempt in 0..REMOVE_ATTEMPTS {
        match fs::remove_file(path).await {
            Ok(()) => return,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) if attempt + 1 == REMOVE_ATTEMPTS => {
                warn!(path = ?path, error = %e, "giving up removing run log");
            }
            Err(_) => tokio::time::sleep(REMOVE_BACKOFF * (attempt + 1)).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_run_is_appended_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(run_log_dir(dir.path())).await.unwrap();
        fs::write(run_log_path(dir.path(), 1), "boom\n").await.unwrap();

        migrate_failed_run(dir.path(), 1, Failure::Exit(2)).await.unwrap();

        let log = fs::read_to_string(error_log_path(dir.path())).await.unwrap();
        assert!(log.contains("Run #1 FAILED (exit code 2)"));
        assert!(log.ends_with("boom\n"));
        assert!(!run_log_path(dir.path(), 1).exists());

        migrate_failed_run(dir.path(), 1, Failure::Internal("spawn failed"))
            .await
            .unwrap();
        let log = fs::read_to_string(error_log_path(dir.path())).await.unwrap();
        assert!(log.contains("boom\n"));
        assert!(log.contains("INTERNAL ERROR: spawn failed"));
    }
}
