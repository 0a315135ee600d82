// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::ExecutionMode;

/// Command-line arguments for `runpool`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runpool",
    version,
    about = "Queue, run and recover batches of long-running script tasks.",
    long_about = None
)]
pub struct CliArgs {
    /// Task root directory.
    ///
    /// Default: `RUNPOOL_ROOT`, else `./_runpool_`.
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Settings file (TOML). Default: `<root>/runpool.toml`.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNPOOL_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create tasks from a YAML/JSON template (pipe syntax expands batches).
    New(NewArgs),

    /// Show how a template expands, without creating anything.
    Preview {
        #[arg(long, value_name = "FILE")]
        template: PathBuf,
    },

    /// List tasks, pinned first.
    List,

    /// Queue tasks and run them until nothing is queued or running.
    Run(RunArgs),

    /// Run a finished task again.
    Rerun {
        task: String,
        #[arg(long)]
        follow: bool,
    },

    /// Cancel a queued or running task.
    Cancel { task: String },

    /// Move a task to the trash.
    Delete { task: String },

    /// Pin (or unpin with --off) a task.
    Pin {
        task: String,
        #[arg(long)]
        off: bool,
    },

    /// Export per-run monitor data.
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
    },

    /// Record metrics for the current run (use from inside a task).
    Monitor {
        #[arg(value_name = "KEY=VALUE", required = true)]
        pairs: Vec<String>,
    },

    /// Execute one serialized work unit (process-mode worker).
    #[command(hide = true)]
    Worker {
        #[arg(long, value_name = "JSON")]
        unit: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct NewArgs {
    #[arg(long, value_name = "FILE")]
    pub template: PathBuf,

    /// Task name, or batch name prefix.
    #[arg(long, default_value = "")]
    pub prefix: String,

    /// Script run with the configured interpreter.
    #[arg(long, value_name = "PATH")]
    pub script: Option<String>,

    /// Shell command, used instead of a script.
    #[arg(long, value_name = "CMD")]
    pub command: Option<String>,

    /// Working directory for the task process.
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<String>,

    /// Extra environment variable for the task process.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Tasks to queue (id, id prefix or name).
    pub tasks: Vec<String>,

    /// Queue every pending task.
    #[arg(long)]
    pub all: bool,

    #[arg(long, value_name = "N")]
    pub max_workers: Option<usize>,

    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Stream task output to stdout.
    #[arg(long)]
    pub follow: bool,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum ModeArg {
    Thread,
    Process,
}

impl From<ModeArg> for ExecutionMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Thread => ExecutionMode::Thread,
            ModeArg::Process => ExecutionMode::Process,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
