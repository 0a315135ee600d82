// src/exec/command.rs

//! Building the command line and environment of a task process.
//!
//! Resolution order:
//! 1. `record.command`: run through the platform shell.
//! 2. `record.script`: `[interpreter, script, ...]`. If the script declares
//!    argparse-style parameters (`add_argument(...)`), the resolved config
//!    is passed back as flags. Otherwise the child finds its config through
//!    the `RUNPOOL_CONFIG` env var only.
//! 3. Neither: the task cannot run.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Result, bail};
use regex::Regex;
use serde_json::Value;

use crate::record::layout::{ENV_CONFIG, ENV_RUN_INDEX, ENV_TASK_DIR, config_path};
use crate::record::{ConfigMap, TaskRecord};

/// Variables forcing UTF-8, unbuffered output from Python children.
const PYTHON_ENV: [(&str, &str); 3] = [
    ("PYTHONIOENCODING", "utf-8"),
    ("PYTHONUTF8", "1"),
    ("PYTHONUNBUFFERED", "1"),
];

/// Everything needed to spawn one run of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Applied on top of the inherited environment, in order.
    pub env: Vec<(String, String)>,
}

/// Build the launch spec for `record`, whose directory is `task_dir`.
pub fn build_launch(
    record: &TaskRecord,
    task_dir: &Path,
    run_index: u32,
    interpreter: &str,
) -> Result<LaunchSpec> {
    let env = build_env(record, task_dir, run_index);
    let workdir = record
        .workdir
        .as_deref()
        .filter(|w| !w.trim().is_empty())
        .map(PathBuf::from);

    if let Some(command) = record.command.as_deref().filter(|c| !c.trim().is_empty()) {
        let (program, flag) = if cfg!(windows) {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };
        return Ok(LaunchSpec {
            program: program.to_string(),
            args: vec![flag.to_string(), command.to_string()],
            cwd: workdir.or_else(|| Some(task_dir.to_path_buf())),
            env,
        });
    }

    let Some(script) = record.script.as_deref().filter(|s| !s.trim().is_empty()) else {
        bail!("task '{}' has neither a command nor a script", record.name);
    };

    let mut args = vec![script.to_string()];
    if let Some(declared) = std::fs::read_to_string(script)
        .ok()
        .and_then(|source| declared_arguments(&source))
    {
        args.extend(config_to_flags(&record.config, &declared));
    }

    let cwd = workdir.or_else(|| {
        Path::new(script)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
    });

    Ok(LaunchSpec {
        program: interpreter.to_string(),
        args,
        cwd,
        env,
    })
}

fn build_env(record: &TaskRecord, task_dir: &Path, run_index: u32) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = PYTHON_ENV
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    env.push((
        ENV_CONFIG.to_string(),
        config_path(task_dir).to_string_lossy().into_owned(),
    ));
    env.push((
        ENV_TASK_DIR.to_string(),
        task_dir.to_string_lossy().into_owned(),
    ));
    env.push((ENV_RUN_INDEX.to_string(), run_index.to_string()));
    // Task-specific overrides go last so they win.
    env.extend(record.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// One `add_argument(...)` declaration found in a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredArg {
    /// Config key the parameter maps to.
    pub dest: String,
    /// Flag spelling to emit, `None` for positionals.
    pub flag: Option<String>,
}

impl DeclaredArg {
    pub fn is_positional(&self) -> bool {
        self.flag.is_none()
    }
}

fn add_argument_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\.add_argument\s*\(\s*((?:["'][^"']*["']\s*,\s*)*["'][^"']*["'])"#)
            .unwrap_or_else(|e| panic!("invalid add_argument pattern: {e}"))
    })
}

fn string_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"["']([^"']*)["']"#)
            .unwrap_or_else(|e| panic!("invalid literal pattern: {e}"))
    })
}

/// Parameters declared with argparse's `add_argument`, in declaration
/// order. `None` when the script declares none.
pub fn declared_arguments(source: &str) -> Option<Vec<DeclaredArg>> {
    let declared: Vec<DeclaredArg> = add_argument_re()
        .captures_iter(source)
        .filter_map(|caps| {
            let names: Vec<&str> = string_literal_re()
                .captures_iter(caps.get(1)?.as_str())
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect();
            let first = *names.first()?;

            if !first.starts_with('-') {
                return Some(DeclaredArg {
                    dest: first.to_string(),
                    flag: None,
                });
            }
            let flag = names
                .iter()
                .find(|n| n.starts_with("--"))
                .copied()
                .unwrap_or(first);
            Some(DeclaredArg {
                dest: flag.trim_start_matches('-').replace('-', "_"),
                flag: Some(flag.to_string()),
            })
        })
        .collect();

    if declared.is_empty() {
        None
    } else {
        Some(declared)
    }
}

/// Serialize `config` as command-line arguments.
///
/// Positionals come first, in declaration order. Every other top-level key
/// becomes a flag, using the declared spelling when there is one and
/// `--key` otherwise. `true` is a bare flag, `false` and `null` are omitted,
/// lists repeat the flag per element and nested mappings are passed as JSON.
pub fn config_to_flags(config: &ConfigMap, declared: &[DeclaredArg]) -> Vec<String> {
    let mut args = Vec::new();

    for arg in declared.iter().filter(|a| a.is_positional()) {
        match config.get(&arg.dest) {
            Some(Value::Array(items)) => args.extend(items.iter().map(scalar_text)),
            Some(Value::Null) | None => {}
            Some(v) => args.push(scalar_text(v)),
        }
    }

    for (key, value) in config {
        let declared_arg = declared.iter().find(|a| &a.dest == key);
        if declared_arg.is_some_and(DeclaredArg::is_positional) {
            continue;
        }
        let flag = declared_arg
            .and_then(|a| a.flag.clone())
            .unwrap_or_else(|| format!("--{key}"));

        match value {
            Value::Bool(true) => args.push(flag),
            Value::Bool(false) | Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    args.push(flag.clone());
                    args.push(scalar_text(item));
                }
            }
            other => {
                args.push(flag);
                args.push(scalar_text(other));
            }
        }
    }

    args
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
