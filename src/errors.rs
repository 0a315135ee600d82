// src/errors.rs

//! Error type shared by the library modules.
//!
//! Task-level operations on the manager log and swallow their failures;
//! these errors surface from settings loading, task creation and the
//! worker/monitor entry points.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunpoolError {
    #[error("invalid settings: {0}")]
    ConfigError(String),

    #[error("invalid batch template: {0}")]
    BatchError(String),

    #[error("no such task: {0}")]
    TaskNotFound(String),

    #[error("i/o failure: {0}")]
    IoError(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("malformed YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("malformed settings file: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RunpoolError>;
