// src/engine/mod.rs

//! Scheduling engine.
//!
//! - [`core`] holds the pure in-memory task table and its state machine.
//! - [`recovery`] rebuilds the table from disk and fails orphaned runs.
//! - [`manager`] is the shared, thread-safe [`TaskManager`] exposing the
//!   public task operations and persisting every transition.
//! - [`runtime`] is the async control loop that admits queued tasks into an
//!   executor backend and reconciles completions.

/// Result of one run, as reported by an executor backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Exit code of the process, `-1` when there is none.
    Failed(i32),
}

/// Options for the runtime loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// Stop once nothing is queued or running (CLI `run` / `rerun`).
    pub exit_when_idle: bool,
}

/// Events flowing into the runtime from backends and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A dispatched unit of work returned. `Err` carries the message of an
    /// executor-level failure (panic, worker crash, internal error).
    TaskFinished {
        task_id: String,
        result: Result<TaskOutcome, String>,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod manager;
pub mod recovery;
pub mod runtime;

pub use core::{Dispatch, Task, TaskTable};
pub use manager::TaskManager;
pub use runtime::Runtime;
