// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`command`] builds the program, arguments and environment of a run.
//! - [`output`] drains the child's output into the run log and the log bus.
//! - [`error_log`] migrates failed run logs into `error.log`.
//! - [`process`] checks and terminates processes by pid.
//! - [`task_runner`] is the executor proper: one run of one task.
//! - [`backend`] provides the thread and process worker pools behind the
//!   `ExecutorBackend` trait, which tests replace with a fake.

pub mod backend;
pub mod command;
pub mod error_log;
pub mod output;
pub mod process;
pub mod task_runner;

pub use backend::{
    BackendFactory, ExecutorBackend, ProcessBackend, RealBackendFactory, ThreadBackend,
    WORKER_EXIT_FAILED, WorkUnit,
};
pub use process::{kill_process, pid_alive};
pub use task_runner::run_task;
