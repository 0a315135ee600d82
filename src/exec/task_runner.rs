// src/exec/task_runner.rs

//! The executor: one run of one task, from spawn to final record.

use std::io;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::bus::LogBus;
use crate::engine::TaskOutcome;
use crate::exec::backend::WorkUnit;
use crate::exec::command::build_launch;
use crate::exec::error_log::{Failure, migrate_failed_run};
use crate::exec::output::{OutputSink, pump_output};
use crate::record::layout::{run_log_dir, run_log_path};
use crate::record::{now_timestamp, update_record};
use crate::types::TaskStatus;

/// Execute `unit` and finalize its record.
///
/// Every path through here leaves the record in a terminal state on disk.
/// An `Err` means the executor itself failed; the record has already been
/// marked `failed` and the error written to `error.log`.
pub async fn run_task(unit: &WorkUnit, bus: &LogBus) -> Result<TaskOutcome> {
    match execute(unit, bus).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            let msg = format!("{err:#}");
            error!(
                task = %unit.name,
                task_id = %unit.task_id,
                run_index = unit.run_index,
                error = %msg,
                "executor failed"
            );
            if let Err(e) = mark_failed(&unit.dir) {
                warn!(task = %unit.name, error = %e, "could not mark record failed");
            }
            if let Err(e) =
                migrate_failed_run(&unit.dir, unit.run_index, Failure::Internal(&msg)).await
            {
                warn!(task = %unit.name, error = %e, "could not write error log");
            }
            Err(err)
        }
    }
}

async fn execute(unit: &WorkUnit, bus: &LogBus) -> Result<TaskOutcome> {
    let dir = unit.dir.as_path();

    // A record that is already `failed` here was canceled after dispatch.
    // Any pid still listed belongs to an earlier attempt.
    let mut canceled = false;
    let record = update_record(dir, |r| {
        r.run_index = None;
        r.clear_latest_pid();
        if r.status == TaskStatus::Failed {
            canceled = true;
            return;
        }
        r.status = TaskStatus::Running;
        r.progress = 0.0;
    })?;
    if canceled {
        info!(task = %unit.name, run_index = unit.run_index, "task canceled before start");
        return Ok(TaskOutcome::Failed(-1));
    }

    let started_at = now_timestamp();
    fs::create_dir_all(run_log_dir(dir)).await?;
    let log_path = run_log_path(dir, unit.run_index);
    let mut log = fs::File::create(&log_path)
        .await
        .with_context(|| format!("creating run log {:?}", log_path))?;

    let spec = match build_launch(&record, dir, unit.run_index, &unit.interpreter) {
        Ok(spec) => spec,
        Err(e) => {
            warn!(task = %unit.name, error = %e, "nothing to run");
            log.write_all(format!("{e}\n").as_bytes()).await?;
            drop(log);
            return finalize(unit, started_at, -1).await;
        }
    };

    // One pipe behind both fds, so stderr lands in order with stdout.
    let (reader, writer) = io::pipe().context("creating output pipe")?;
    let writer_err = writer.try_clone().context("duplicating output pipe")?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::from(writer))
        .stderr(Stdio::from(writer_err))
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    info!(
        task = %unit.name,
        run_index = unit.run_index,
        program = %spec.program,
        args = ?spec.args,
        "starting task process"
    );

    let spawned = cmd.spawn();
    // Release our copies of the write end, or the reader never sees EOF.
    drop(cmd);
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            warn!(task = %unit.name, program = %spec.program, error = %e, "spawn failed");
            log.write_all(format!("failed to start {}: {e}\n", spec.program).as_bytes())
                .await?;
            drop(log);
            return finalize(unit, started_at, -1).await;
        }
    };

    let pid = child.id();
    let after_spawn = update_record(dir, |r| r.pids.push(pid))?;
    if after_spawn.status != TaskStatus::Running {
        info!(task = %unit.name, ?pid, "task canceled while starting; killing process");
        if let Err(e) = child.start_kill() {
            warn!(task = %unit.name, error = %e, "failed to kill canceled process");
        }
    }

    {
        let mut sink = OutputSink {
            log: &mut log,
            bus,
            task_id: &unit.task_id,
        };
        pump_output(reader, &mut sink).await?;
    }
    drop(log);

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of task '{}'", unit.name))?;
    let code = status.code().unwrap_or(-1);

    info!(
        task = %unit.name,
        run_index = unit.run_index,
        ?pid,
        exit_code = code,
        success = status.success(),
        "task process exited"
    );

    finalize(unit, started_at, code).await
}

/// Write the outcome of a finished attempt.
///
/// A zero exit only counts as success while the record is still `running`;
/// a run canceled in the meantime stays `failed`.
async fn finalize(unit: &WorkUnit, started_at: String, exit_code: i32) -> Result<TaskOutcome> {
    let mut completed = false;
    update_record(&unit.dir, |r| {
        r.run_index = None;
        // The process is gone; its pid may be reused by the OS.
        r.clear_latest_pid();
        if exit_code == 0 && r.status == TaskStatus::Running {
            completed = true;
            r.status = TaskStatus::Completed;
            r.progress = 1.0;
            r.start_times.push(started_at);
            r.finish_times.push(now_timestamp());
            let runs = r.start_times.len();
            r.pad_monitors(runs);
        } else {
            r.status = TaskStatus::Failed;
            r.progress = 0.0;
            let runs = r.start_times.len();
            r.monitors.truncate(runs);
        }
    })?;

    if completed {
        return Ok(TaskOutcome::Completed);
    }

    migrate_failed_run(&unit.dir, unit.run_index, Failure::Exit(exit_code)).await?;
    Ok(TaskOutcome::Failed(exit_code))
}

fn mark_failed(dir: &Path) -> Result<()> {
    update_record(dir, |r| {
        r.status = TaskStatus::Failed;
        r.progress = 0.0;
        r.run_index = None;
        r.clear_latest_pid();
        let runs = r.start_times.len();
        r.monitors.truncate(runs);
    })?;
    Ok(())
}
