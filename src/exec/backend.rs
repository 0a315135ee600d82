// src/exec/backend.rs

//! Pluggable worker pools.
//!
//! The runtime hands each admitted task to an [`ExecutorBackend`] and later
//! receives a [`RuntimeEvent::TaskFinished`] on its event channel. Backends
//! are built by a [`BackendFactory`] so the runtime can rebuild the pool
//! when the execution mode or worker count changes, and so tests can swap
//! in a fake that never spawns processes.
//!
//! - [`ThreadBackend`] runs the executor on the tokio runtime; the worker
//!   just waits on the child process.
//! - [`ProcessBackend`] re-launches this binary as `runpool worker --unit
//!   <json>` per task, for isolation. The unit is therefore serializable.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

use crate::bus::LogBus;
use crate::engine::{RuntimeEvent, TaskOutcome};
use crate::errors::Result;
use crate::exec::task_runner::run_task;
use crate::types::ExecutionMode;

/// Exit code of `runpool worker` when the task failed normally.
pub const WORKER_EXIT_FAILED: i32 = 3;

/// Everything a worker needs to execute one run of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub task_id: String,
    pub name: String,
    pub dir: PathBuf,
    pub run_index: u32,
    pub interpreter: String,
}

pub trait ExecutorBackend: Send {
    fn mode(&self) -> ExecutionMode;

    fn workers(&self) -> usize;

    /// Hand `unit` to the pool. An error means the unit was not accepted
    /// and no completion event will follow.
    fn dispatch(
        &mut self,
        unit: WorkUnit,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

pub trait BackendFactory: Send {
    fn build(
        &self,
        mode: ExecutionMode,
        workers: usize,
        events: mpsc::Sender<RuntimeEvent>,
    ) -> Result<Box<dyn ExecutorBackend>>;
}

/// Production factory.
pub struct RealBackendFactory {
    bus: LogBus,
    worker_program: Option<PathBuf>,
}

impl RealBackendFactory {
    pub fn new(bus: LogBus) -> Self {
        Self {
            bus,
            worker_program: None,
        }
    }

    /// Program launched in process mode instead of the current executable.
    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }
}

impl BackendFactory for RealBackendFactory {
    fn build(
        &self,
        mode: ExecutionMode,
        workers: usize,
        events: mpsc::Sender<RuntimeEvent>,
    ) -> Result<Box<dyn ExecutorBackend>> {
        let workers = workers.max(1);
        match mode {
            ExecutionMode::Thread => Ok(Box::new(ThreadBackend::new(
                workers,
                self.bus.clone(),
                events,
            ))),
            ExecutionMode::Process => {
                let program = match &self.worker_program {
                    Some(p) => p.clone(),
                    None => std::env::current_exe().context("locating runpool executable")?,
                };
                Ok(Box::new(ProcessBackend::new(workers, program, events)))
            }
        }
    }
}

async fn report(events: &mpsc::Sender<RuntimeEvent>, task_id: String, result: std::result::Result<TaskOutcome, String>) {
    if events
        .send(RuntimeEvent::TaskFinished { task_id, result })
        .await
        .is_err()
    {
        debug!("runtime gone; dropping completion event");
    }
}

/// In-process pool: each unit runs as a tokio task, at most `workers` at a
/// time.
pub struct ThreadBackend {
    workers: usize,
    permits: Arc<Semaphore>,
    bus: LogBus,
    events: mpsc::Sender<RuntimeEvent>,
}

impl ThreadBackend {
    pub fn new(workers: usize, bus: LogBus, events: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            workers,
            permits: Arc::new(Semaphore::new(workers)),
            bus,
            events,
        }
    }
}

impl ExecutorBackend for ThreadBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Thread
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn dispatch(
        &mut self,
        unit: WorkUnit,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.events.is_closed() {
                return Err(anyhow!("runtime event channel closed").into());
            }
            let permits = Arc::clone(&self.permits);
            let bus = self.bus.clone();
            let events = self.events.clone();

            tokio::spawn(async move {
                let _permit = permits.acquire_owned().await;
                let task_id = unit.task_id.clone();

                // Inner task so a panic in the executor becomes a JoinError.
                let handle = tokio::spawn(async move { run_task(&unit, &bus).await });
                let result = match handle.await {
                    Ok(Ok(outcome)) => Ok(outcome),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(join) => Err(format!("executor panicked: {join}")),
                };
                report(&events, task_id, result).await;
            });
            Ok(())
        })
    }
}

/// Out-of-process pool: one `runpool worker` child per unit.
pub struct ProcessBackend {
    workers: usize,
    program: PathBuf,
    events: mpsc::Sender<RuntimeEvent>,
}

impl ProcessBackend {
    pub fn new(workers: usize, program: PathBuf, events: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            workers,
            program,
            events,
        }
    }
}

impl ExecutorBackend for ProcessBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Process
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn dispatch(
        &mut self,
        unit: WorkUnit,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let payload = serde_json::to_string(&unit)?;
            let mut child = Command::new(&self.program)
                .arg("worker")
                .arg("--unit")
                .arg(&payload)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("spawning worker {:?}", self.program))?;

            let events = self.events.clone();
            tokio::spawn(async move {
                let result = match child.wait().await {
                    Ok(status) => match status.code() {
                        Some(0) => Ok(TaskOutcome::Completed),
                        Some(WORKER_EXIT_FAILED) => Ok(TaskOutcome::Failed(-1)),
                        other => Err(format!("worker exited abnormally ({other:?})")),
                    },
                    Err(e) => {
                        warn!(task = %unit.name, error = %e, "lost track of worker process");
                        Err(e.to_string())
                    }
                };
                report(&events, unit.task_id, result).await;
            });
            Ok(())
        })
    }
}
