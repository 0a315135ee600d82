// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{RawSettings, Settings};
use crate::errors::Result;

/// Environment variable naming the task root directory.
pub const ROOT_ENV: &str = "RUNPOOL_ROOT";

/// Root directory used when neither `--root` nor `RUNPOOL_ROOT` is set.
pub const DEFAULT_ROOT_NAME: &str = "_runpool_";

/// File name of the settings file inside the root directory.
pub const SETTINGS_FILENAME: &str = "runpool.toml";

/// Load a settings file and return the raw `RawSettings`.
///
/// This only performs TOML deserialization; use [`load_and_validate`] for
/// range checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawSettings> {
    let contents = fs::read_to_string(path.as_ref())?;
    let raw: RawSettings = toml::from_str(&contents)?;
    Ok(raw)
}

/// Load a settings file from path and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Settings> {
    let raw = load_from_path(&path)?;
    Settings::try_from(raw)
}

/// Like [`load_and_validate`], but a missing file yields the defaults.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(path = ?path, "no settings file; using defaults");
        return Ok(Settings::default());
    }
    load_and_validate(path)
}

/// Resolve the task root: explicit flag, then `RUNPOOL_ROOT`, then
/// `./_runpool_`.
pub fn resolve_root_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var_os(ROOT_ENV) {
        Some(val) if !val.is_empty() => PathBuf::from(val),
        _ => std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(DEFAULT_ROOT_NAME),
    }
}
