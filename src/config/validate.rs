// src/config/validate.rs

use crate::config::model::{RawSettings, Settings};
use crate::errors::{Result, RunpoolError};

/// Bounds for `[pool].poll_interval_ms`.
const MIN_POLL_MS: u64 = 10;
const MAX_POLL_MS: u64 = 5_000;

impl TryFrom<RawSettings> for Settings {
    type Error = RunpoolError;

    fn try_from(raw: RawSettings) -> std::result::Result<Self, Self::Error> {
        validate_settings(&raw)?;
        Ok(Settings::new_unchecked(raw.pool, raw.exec))
    }
}

pub fn validate_settings(raw: &RawSettings) -> Result<()> {
    validate_pool(raw)?;
    validate_exec(raw)?;
    Ok(())
}

fn validate_pool(raw: &RawSettings) -> Result<()> {
    if raw.pool.max_workers == 0 {
        return Err(RunpoolError::ConfigError(
            "[pool].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }

    let poll = raw.pool.poll_interval_ms;
    if !(MIN_POLL_MS..=MAX_POLL_MS).contains(&poll) {
        return Err(RunpoolError::ConfigError(format!(
            "[pool].poll_interval_ms must be within {MIN_POLL_MS}..={MAX_POLL_MS} (got {poll})"
        )));
    }

    Ok(())
}

fn validate_exec(raw: &RawSettings) -> Result<()> {
    if raw.exec.interpreter.trim().is_empty() {
        return Err(RunpoolError::ConfigError(
            "[exec].interpreter must not be empty".to_string(),
        ));
    }
    Ok(())
}
