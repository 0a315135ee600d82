// src/record/mod.rs

//! Persisted task state.
//!
//! - [`layout`] names the files and directories inside a task directory.
//! - [`model`] is the `task_info.json` document ([`TaskRecord`]).
//! - [`store`] reads and writes records (read-modify-write, atomic replace).
//! - [`monitor`] merges user-reported metrics into the current run's slot.

pub mod layout;
pub mod model;
pub mod monitor;
pub mod store;

pub use model::{ConfigMap, TaskRecord, now_timestamp};
pub use store::{load_record, save_record, update_record};
