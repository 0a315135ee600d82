// tests/scheduler_fake_backend.rs

use std::error::Error;
use std::path::Path;
use std::time::Duration;

use serde_json::json;

use runpool::bus::LogBus;
use runpool::engine::core::PoolConfig;
use runpool::engine::{Runtime, RuntimeEvent, RuntimeOptions, TaskManager};
use runpool::factory::TaskOptions;
use runpool::record::load_record;
use runpool::types::{ExecutionMode, TaskStatus};
use runpool_test_utils::builders::{TaskDirBuilder, config_map};
use runpool_test_utils::fake_backend::{FakeBackendFactory, FakeControl};
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

fn runtime(manager: &TaskManager, control: &FakeControl, exit_when_idle: bool) -> Runtime<FakeBackendFactory> {
    Runtime::new(
        manager.clone(),
        FakeBackendFactory::new(control.clone()),
        "python",
        Duration::from_millis(20),
        RuntimeOptions { exit_when_idle },
    )
}

fn statuses(manager: &TaskManager) -> Vec<TaskStatus> {
    manager.tasks().into_iter().map(|t| t.status).collect()
}

#[tokio::test]
async fn one_worker_runs_tasks_one_at_a_time_in_order() -> TestResult {
    init_tracing();
    let root = tempfile::tempdir()?;
    let manager = open(root.path(), 1);
    let configs = (0..3).map(|i| config_map(json!({ "seed": i }))).collect();
    let created = manager.create_tasks(configs, "exp", &TaskOptions::default())?;
    let ids: Vec<String> = created.iter().map(|r| r.id.clone()).collect();

    assert_eq!(manager.enqueue(&ids), 3);
    manager.set_processing(true);

    let control = FakeControl::default();
    let handle = tokio::spawn(runtime(&manager, &control, true).run());

    wait_until("first dispatch", || control.dispatched().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(control.dispatched().len(), 1);
    assert_eq!(
        statuses(&manager),
        vec![TaskStatus::Running, TaskStatus::Queued, TaskStatus::Queued]
    );

    for step in 0..3 {
        wait_until("next dispatch", || control.dispatched().len() == step + 1).await;
        let unit = control.dispatched()[step].clone();
        assert_eq!(unit.task_id, ids[step]);
        assert_eq!(unit.run_index, 1);
        assert_eq!(manager.running_count(), 1);
        control.complete(&unit, true).await;
    }

    with_timeout(handle).await??;
    assert_eq!(statuses(&manager), vec![TaskStatus::Completed; 3]);
    assert_eq!(control.builds(), vec![(ExecutionMode::Thread, 1)]);
    Ok(())
}

#[tokio::test]
async fn canceled_before_dispatch_never_runs() -> TestResult {
    let root = tempfile::tempdir()?;
    let manager = open(root.path(), 1);
    let created = manager.create_tasks(vec![config_map(json!({}))], "solo", &TaskOptions::default())?;
    let id = created[0].id.clone();

    assert_eq!(manager.enqueue(std::slice::from_ref(&id)), 1);
    assert!(manager.cancel(&id));
    manager.set_processing(true);

    let control = FakeControl::default();
    with_timeout(runtime(&manager, &control, true).run()).await?;

    assert!(control.dispatched().is_empty());
    assert_eq!(manager.get(&id).unwrap().status, TaskStatus::Failed);
    let on_disk = load_record(&root.path().join("solo"))?;
    assert_eq!(on_disk.status, TaskStatus::Failed);
    assert_eq!(on_disk.run_index, None);
    Ok(())
}

#[tokio::test]
async fn refused_dispatch_fails_the_task() -> TestResult {
    let root = tempfile::tempdir()?;
    let manager = open(root.path(), 2);
    let created = manager.create_tasks(vec![config_map(json!({}))], "refused", &TaskOptions::default())?;
    let id = created[0].id.clone();
    manager.enqueue(std::slice::from_ref(&id));
    manager.set_processing(true);

    let control = FakeControl::default();
    control.fail_dispatch(true);
    with_timeout(runtime(&manager, &control, true).run()).await?;

    assert_eq!(manager.get(&id).unwrap().status, TaskStatus::Failed);
    assert_eq!(manager.running_count(), 0);
    assert_eq!(load_record(&root.path().join("refused"))?.status, TaskStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn worker_crash_forces_failed() -> TestResult {
    let root = tempfile::tempdir()?;
    let manager = open(root.path(), 1);
    let created = manager.create_tasks(vec![config_map(json!({}))], "crashy", &TaskOptions::default())?;
    let id = created[0].id.clone();
    manager.enqueue(std::slice::from_ref(&id));
    manager.set_processing(true);

    let control = FakeControl::default();
    let handle = tokio::spawn(runtime(&manager, &control, true).run());
    wait_until("dispatch", || control.dispatched().len() == 1).await;
    control.crash(&control.dispatched()[0], "executor panicked").await;
    with_timeout(handle).await??;

    assert_eq!(manager.get(&id).unwrap().status, TaskStatus::Failed);
    assert_eq!(load_record(&root.path().join("crashy"))?.status, TaskStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn rerun_after_two_runs_uses_index_three() -> TestResult {
    let root = tempfile::tempdir()?;
    let dir = TaskDirBuilder::new(root.path(), "veteran")
        .status(TaskStatus::Completed)
        .completed_run(json!({"loss": 0.9}))
        .completed_run(json!({"loss": 0.5}))
        .write();
    let manager = open(root.path(), 1);

    assert!(!manager.rerun("missing"));
    assert!(manager.rerun("id-veteran"));
    assert!(!manager.rerun("id-veteran"), "already queued");
    assert_eq!(load_record(&dir)?.run_index, Some(3));
    manager.set_processing(true);

    let control = FakeControl::default();
    let handle = tokio::spawn(runtime(&manager, &control, true).run());
    wait_until("dispatch", || control.dispatched().len() == 1).await;
    let unit = control.dispatched()[0].clone();
    assert_eq!(unit.run_index, 3);
    control.complete(&unit, true).await;
    with_timeout(handle).await??;

    let rec = load_record(&dir)?;
    assert_eq!(rec.start_times.len(), 3);
    assert_eq!(rec.monitors.len(), 3);
    assert_eq!(rec.monitors[0], config_map(json!({"loss": 0.9})));
    assert_eq!(rec.monitors[1], config_map(json!({"loss": 0.5})));
    assert!(rec.monitors[2].is_empty());
    Ok(())
}

#[tokio::test]
async fn pool_is_rebuilt_when_settings_change() -> TestResult {
    let root = tempfile::tempdir()?;
    let manager = open(root.path(), 1);
    let configs = (0..3).map(|i| config_map(json!({ "i": i }))).collect();
    let created = manager.create_tasks(configs, "grow", &TaskOptions::default())?;
    let ids: Vec<String> = created.iter().map(|r| r.id.clone()).collect();
    manager.enqueue(&ids);
    manager.set_processing(true);

    let control = FakeControl::default();
    let rt = runtime(&manager, &control, false);
    let shutdown = rt.event_sender();
    let handle = tokio::spawn(rt.run());

    wait_until("first dispatch", || control.dispatched().len() == 1).await;
    manager.set_pool(ExecutionMode::Thread, 3);
    wait_until("remaining dispatches", || control.dispatched().len() == 3).await;
    assert_eq!(
        control.builds(),
        vec![(ExecutionMode::Thread, 1), (ExecutionMode::Thread, 3)]
    );

    shutdown.send(RuntimeEvent::ShutdownRequested).await?;
    with_timeout(handle).await??;
    Ok(())
}
