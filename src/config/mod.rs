// src/config/mod.rs

//! Settings loading and validation for runpool.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a settings file from disk (`loader.rs`).
//! - Validate pool and exec limits (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default, resolve_root_dir};
pub use model::{ExecSection, PoolSection, RawSettings, Settings};
