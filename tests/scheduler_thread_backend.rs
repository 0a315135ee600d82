// tests/scheduler_thread_backend.rs
#![cfg(unix)]

use std::error::Error;
use std::path::Path;
use std::time::Duration;

use serde_json::json;

use runpool::bus::LogBus;
use runpool::engine::core::PoolConfig;
use runpool::engine::{Runtime, RuntimeOptions, TaskManager};
use runpool::exec::RealBackendFactory;
use runpool::factory::TaskOptions;
use runpool::record::layout::error_log_path;
use runpool::record::load_record;
use runpool::types::{ExecutionMode, TaskStatus};
use runpool_test_utils::builders::config_map;
use runpool_test_utils::{init_tracing, wait_until, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn open(root: &Path, max_workers: usize) -> TaskManager {
    TaskManager::open(
        root,
        PoolConfig {
            mode: ExecutionMode::Thread,
            max_workers,
        },
        LogBus::new(),
    )
    .unwrap()
}

fn runtime(manager: &TaskManager) -> Runtime<RealBackendFactory> {
    Runtime::new(
        manager.clone(),
        RealBackendFactory::new(manager.bus().clone()),
        "sh",
        Duration::from_millis(20),
        RuntimeOptions {
            exit_when_idle: true,
        },
    )
}

fn command(cmd: &str) -> TaskOptions {
    TaskOptions {
        command: Some(cmd.to_string()),
        ..TaskOptions::default()
    }
}

#[tokio::test]
async fn queued_shell_tasks_all_complete() -> TestResult {
    init_tracing();
    let root = tempfile::tempdir()?;
    let manager = open(root.path(), 2);
    let configs = (0..3).map(|i| config_map(json!({ "i": i }))).collect();
    let created = manager.create_tasks(configs, "echo", &command("echo hi"))?;
    let ids: Vec<String> = created.iter().map(|r| r.id.clone()).collect();

    assert_eq!(manager.enqueue(&ids), 3);
    manager.set_processing(true);
    with_timeout(runtime(&manager).run()).await?;

    for id in &ids {
        let task = manager.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed, "task {}", task.name);
        assert_eq!(task.start_times.len(), 1);
    }
    assert_eq!(manager.running_count(), 0);
    Ok(())
}

#[tokio::test]
async fn canceling_a_running_task_kills_it() -> TestResult {
    init_tracing();
    let root = tempfile::tempdir()?;
    let manager = open(root.path(), 1);
    let created = manager.create_tasks(
        vec![config_map(json!({}))],
        "sleeper",
        &command("exec sleep 30"),
    )?;
    let id = created[0].id.clone();
    let dir = root.path().join("sleeper");

    manager.enqueue(std::slice::from_ref(&id));
    manager.set_processing(true);
    let handle = tokio::spawn(runtime(&manager).run());

    wait_until("process started", || {
        load_record(&dir)
            .map(|r| r.status == TaskStatus::Running && r.latest_pid().is_some())
            .unwrap_or(false)
    })
    .await;

    assert!(manager.cancel(&id));
    assert!(!manager.cancel(&id), "already failed");
    with_timeout(handle).await??;

    assert_eq!(manager.get(&id).unwrap().status, TaskStatus::Failed);
    let rec = load_record(&dir)?;
    assert_eq!(rec.status, TaskStatus::Failed);
    assert!(rec.start_times.is_empty());
    assert!(error_log_path(&dir).exists());
    Ok(())
}
