// src/lib.rs

pub mod batch;
pub mod bus;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod export;
pub mod factory;
pub mod logging;
pub mod record;
pub mod types;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::batch::{count_batch_configs, generate_batch_configs, parse::parse_scalar};
use crate::bus::LogBus;
use crate::cli::{CliArgs, Command, ExportFormat, NewArgs, RunArgs};
use crate::config::loader::{SETTINGS_FILENAME, load_or_default, resolve_root_dir};
use crate::config::model::Settings;
use crate::engine::core::PoolConfig;
use crate::engine::{Runtime, RuntimeEvent, RuntimeOptions, TaskManager, TaskOutcome};
use crate::exec::{RealBackendFactory, WORKER_EXIT_FAILED, WorkUnit, run_task};
use crate::factory::TaskOptions;
use crate::record::{ConfigMap, TaskRecord};
use crate::types::TaskStatus;

/// High-level entry point used by `main.rs`. Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    if let Command::Worker { unit } = &args.command {
        return Ok(run_worker(unit).await);
    }
    if let Command::Monitor { pairs } = &args.command {
        return record_monitor(pairs).await;
    }

    let root = resolve_root_dir(args.root.as_deref());
    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(|| root.join(SETTINGS_FILENAME));
    let settings = load_or_default(&settings_path)
        .with_context(|| format!("loading settings from {:?}", settings_path))?;
    debug!(root = ?root, ?settings, "resolved settings");

    if let Command::Preview { template } = &args.command {
        return preview(template);
    }

    let pool = PoolConfig {
        mode: settings.pool.execution_mode,
        max_workers: settings.pool.max_workers,
    };
    let manager = TaskManager::open(&root, pool, LogBus::new())?;

    match args.command {
        Command::New(new) => create(&manager, &settings, new),
        Command::List => {
            list(&manager);
            Ok(0)
        }
        Command::Run(run) => run_tasks(&manager, &settings, run).await,
        Command::Rerun { task, follow } => {
            let record = find(&manager, &task)?;
            if !manager.rerun(&record.id) {
                bail!("task '{}' is {}; only finished tasks can be rerun", record.name, record.status);
            }
            manager.set_processing(true);
            drive(&manager, &settings, &[record.id], follow).await
        }
        Command::Cancel { task } => {
            let record = find(&manager, &task)?;
            if !manager.cancel(&record.id) {
                bail!("task '{}' is {}; only queued or running tasks can be canceled", record.name, record.status);
            }
            println!("canceled {}", record.name);
            Ok(0)
        }
        Command::Delete { task } => {
            let record = find(&manager, &task)?;
            if !manager.delete(&record.id) {
                bail!("could not delete task '{}' (cancel it first if it is running)", record.name);
            }
            println!("moved {} to trash", record.name);
            Ok(0)
        }
        Command::Pin { task, off } => {
            let record = find(&manager, &task)?;
            if !manager.set_pinned(&record.id, !off) {
                bail!("could not update task '{}'", record.name);
            }
            Ok(0)
        }
        Command::Export { format } => {
            let tasks = manager.tasks();
            match format {
                ExportFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&export::build_export_json(&tasks))?)
                }
                ExportFormat::Csv => print!("{}", export::build_export_csv(&tasks)),
            }
            Ok(0)
        }
        Command::Preview { .. } | Command::Monitor { .. } | Command::Worker { .. } => Ok(0),
    }
}

fn find(manager: &TaskManager, query: &str) -> Result<TaskRecord> {
    manager
        .find(query)
        .ok_or_else(|| errors::RunpoolError::TaskNotFound(query.to_string()).into())
}

/// Read a YAML (or JSON) template into a mapping.
fn load_template(path: &Path) -> Result<ConfigMap> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let value: serde_json::Value =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {:?}", path))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(ConfigMap::new()),
        _ => bail!("template {:?} must be a mapping", path),
    }
}

fn parse_env_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|p| {
            p.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{p}'"))
        })
        .collect()
}

fn create(manager: &TaskManager, settings: &Settings, args: NewArgs) -> Result<i32> {
    let template = load_template(&args.template)?;
    let configs: Vec<ConfigMap> = generate_batch_configs(template)?
        .into_iter()
        .map(|g| g.config)
        .collect();

    let options = TaskOptions {
        script: args.script.or_else(|| settings.exec.script.clone()),
        command: args.command,
        workdir: args.workdir,
        env: parse_env_pairs(&args.env)?,
    };
    let created = manager.create_tasks(configs, &args.prefix, &options)?;
    for record in &created {
        println!("{}  {}", short_id(&record.id), record.name);
    }
    Ok(0)
}

fn preview(template: &Path) -> Result<i32> {
    let base = load_template(template)?;
    let total = count_batch_configs(&base);
    if total == 0 {
        bail!("zip parameters have different lengths");
    }
    let generated = generate_batch_configs(base)?;
    println!("{total} config(s)");
    for (i, g) in generated.iter().enumerate() {
        let desc = if g.description.is_empty() { "(no sweep)" } else { &g.description };
        println!("  [{}] {desc}", i + 1);
    }
    Ok(0)
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn list(manager: &TaskManager) {
    let mut tasks = manager.tasks();
    // Stable: creation order within each group.
    tasks.sort_by_key(|t| !t.pinned);
    for t in tasks {
        println!(
            "{} {:<9}  {}  {}  runs={}",
            if t.pinned { "*" } else { " " },
            t.status,
            short_id(&t.id),
            t.name,
            t.start_times.len()
        );
    }
}

async fn run_tasks(manager: &TaskManager, settings: &Settings, args: RunArgs) -> Result<i32> {
    let pool = manager.pool();
    manager.set_pool(
        args.mode.map(Into::into).unwrap_or(pool.mode),
        args.max_workers.unwrap_or(pool.max_workers),
    );

    let mut ids: Vec<String> = Vec::new();
    if args.all {
        ids.extend(
            manager
                .tasks()
                .into_iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .map(|t| t.id),
        );
    }
    for query in &args.tasks {
        ids.push(find(manager, query)?.id);
    }

    let queued = manager.enqueue(&ids);
    let already_queued: Vec<String> = manager
        .tasks()
        .into_iter()
        .filter(|t| t.status == TaskStatus::Queued)
        .map(|t| t.id)
        .collect();
    if already_queued.is_empty() {
        println!("nothing to run");
        return Ok(0);
    }
    info!(queued, total_queued = already_queued.len(), "starting queue");

    manager.set_processing(true);
    drive(manager, settings, &already_queued, args.follow).await
}

/// Run the control loop until idle, optionally streaming output of `ids`.
async fn drive(
    manager: &TaskManager,
    settings: &Settings,
    ids: &[String],
    follow: bool,
) -> Result<i32> {
    let followers: Vec<_> = if follow {
        ids.iter()
            .map(|id| spawn_follower(manager.bus(), id))
            .collect()
    } else {
        Vec::new()
    };

    let runtime = Runtime::new(
        manager.clone(),
        RealBackendFactory::new(manager.bus().clone()),
        settings.exec.interpreter.clone(),
        settings.poll_interval(),
        RuntimeOptions {
            exit_when_idle: true,
        },
    );

    let tx = runtime.event_sender();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
    });

    runtime.run().await?;

    for record in manager.tasks() {
        if record.status == TaskStatus::Running && manager.cancel(&record.id) {
            info!(task = %record.name, "canceled on shutdown");
        }
    }
    for handle in followers {
        handle.abort();
    }

    let mut failed = 0;
    for id in ids {
        if let Some(record) = manager.get(id) {
            println!("{:<9}  {}", record.status, record.name);
            if record.status != TaskStatus::Completed {
                failed += 1;
            }
        }
    }
    Ok(if failed == 0 { 0 } else { 1 })
}

fn spawn_follower(bus: &LogBus, task_id: &str) -> tokio::task::JoinHandle<()> {
    let mut sub = bus.subscribe(task_id);
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(chunk) = sub.recv().await {
            if stdout.write_all(chunk.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    })
}

/// Body of the hidden `worker` subcommand.
async fn run_worker(payload: &str) -> i32 {
    let unit: WorkUnit = match serde_json::from_str(payload) {
        Ok(unit) => unit,
        Err(e) => {
            warn!(error = %e, "invalid work unit");
            return 2;
        }
    };
    match run_task(&unit, &LogBus::new()).await {
        Ok(TaskOutcome::Completed) => 0,
        Ok(TaskOutcome::Failed(_)) => WORKER_EXIT_FAILED,
        Err(_) => 1,
    }
}

async fn record_monitor(pairs: &[String]) -> Result<i32> {
    let data: ConfigMap = parse_env_pairs(pairs)?
        .into_iter()
        .map(|(k, v)| (k, parse_scalar(&v)))
        .collect();
    if !record::monitor::add_monitor_from_env(&serde_json::Value::Object(data)).await? {
        warn!("not running inside a runpool task; nothing recorded");
    }
    Ok(0)
}
