// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

use crate::types::ExecutionMode;

/// Settings as read from a `runpool.toml` file.
///
/// ```toml
/// [pool]
/// max_workers = 2
/// execution_mode = "thread"
/// poll_interval_ms = 150
///
/// [exec]
/// interpreter = "python3"
/// script = "train.py"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSettings {
    /// Worker pool behaviour from `[pool]`.
    #[serde(default)]
    pub pool: PoolSection,

    /// How task processes are launched, from `[exec]`.
    #[serde(default)]
    pub exec: ExecSection,
}

/// `[pool]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSection {
    /// Maximum number of tasks running at the same time.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// `"thread"` (default) or `"process"`.
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Upper bound on how long the control loop sleeps between admission
    /// checks when nothing wakes it up.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_max_workers() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    150
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            execution_mode: ExecutionMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// `[exec]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecSection {
    /// Program used to run a task's script (`[interpreter, script]`).
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Script recorded on newly created tasks when none is given explicitly.
    #[serde(default)]
    pub script: Option<String>,
}

fn default_interpreter() -> String {
    "python".to_string()
}

impl Default for ExecSection {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script: None,
        }
    }
}

/// Validated settings. Only constructible through `TryFrom<RawSettings>`
/// (see `validate.rs`) or [`Settings::default`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub pool: PoolSection,
    pub exec: ExecSection,
}

impl Settings {
    pub(crate) fn new_unchecked(pool: PoolSection, exec: ExecSection) -> Self {
        Self { pool, exec }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.pool.poll_interval_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new_unchecked(PoolSection::default(), ExecSection::default())
    }
}
