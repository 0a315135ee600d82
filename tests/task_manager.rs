// tests/task_manager.rs

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::Path;

use serde_json::json;

use runpool::bus::LogBus;
use runpool::engine::TaskManager;
use runpool::engine::core::PoolConfig;
use runpool::factory::TaskOptions;
use runpool::record::load_record;
use runpool::types::{ExecutionMode, TaskStatus};
use runpool_test_utils::builders::{TaskDirBuilder, config_map};

type TestResult = Result<(), Box<dyn Error>>;

fn open(root: &Path) -> TaskManager {
    TaskManager::open(root, PoolConfig::default(), LogBus::new()).unwrap()
}

#[test]
fn open_loads_existing_tasks_oldest_first() -> TestResult {
    let root = tempfile::tempdir()?;
    TaskDirBuilder::new(root.path(), "newer")
        .created_at("2026-03-02 09:00:00")
        .write();
    TaskDirBuilder::new(root.path(), "older")
        .created_at("2026-03-01 09:00:00")
        .write();

    let manager = open(root.path());
    let names: Vec<String> = manager.tasks().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["older", "newer"]);
    Ok(())
}

#[test]
fn batch_created_in_one_second_keeps_its_index_order() -> TestResult {
    let root = tempfile::tempdir()?;
    for i in [12, 3, 10, 1, 7, 11, 2, 9, 4, 8, 5, 6] {
        TaskDirBuilder::new(root.path(), &format!("exp-[{i}-of-12]"))
            .created_at("2026-03-01 09:00:00")
            .write();
    }
    TaskDirBuilder::new(root.path(), "exp")
        .created_at("2026-03-01 09:00:00")
        .write();

    let manager = open(root.path());
    let names: Vec<String> = manager.tasks().into_iter().map(|t| t.name).collect();
    let mut expected = vec!["exp".to_string()];
    expected.extend((1..=12).map(|i| format!("exp-[{i}-of-12]")));
    assert_eq!(names, expected);
    Ok(())
}

#[test]
fn enqueue_only_accepts_idle_tasks() -> TestResult {
    let root = tempfile::tempdir()?;
    TaskDirBuilder::new(root.path(), "pending").write();
    TaskDirBuilder::new(root.path(), "done")
        .status(TaskStatus::Completed)
        .completed_run(json!({}))
        .write();
    TaskDirBuilder::new(root.path(), "queued")
        .status(TaskStatus::Queued)
        .run_index(1)
        .write();
    let manager = open(root.path());

    let ids = ["id-pending", "id-done", "id-queued", "id-missing"].map(String::from);
    assert_eq!(manager.enqueue(&ids), 2);

    let done = load_record(&root.path().join("done"))?;
    assert_eq!(done.status, TaskStatus::Queued);
    assert_eq!(done.run_index, Some(2));
    assert_eq!(load_record(&root.path().join("pending"))?.run_index, Some(1));
    Ok(())
}

#[test]
fn rerun_requires_a_finished_task() -> TestResult {
    let root = tempfile::tempdir()?;
    TaskDirBuilder::new(root.path(), "pending").write();
    TaskDirBuilder::new(root.path(), "failed")
        .status(TaskStatus::Failed)
        .write();
    let manager = open(root.path());

    assert!(!manager.rerun("id-pending"));
    assert!(manager.rerun("id-failed"));
    // A failed attempt does not consume a run index.
    assert_eq!(load_record(&root.path().join("failed"))?.run_index, Some(1));
    Ok(())
}

#[test]
fn cancel_of_a_queued_task_is_persisted() -> TestResult {
    let root = tempfile::tempdir()?;
    let dir = TaskDirBuilder::new(root.path(), "waiting").write();
    let manager = open(root.path());

    assert!(!manager.cancel("id-waiting"), "pending tasks cannot be canceled");
    manager.enqueue(&["id-waiting".to_string()]);
    assert!(manager.cancel("id-waiting"));

    let rec = load_record(&dir)?;
    assert_eq!(rec.status, TaskStatus::Failed);
    assert_eq!(rec.run_index, None);
    assert_eq!(manager.get("id-waiting").unwrap().status, TaskStatus::Failed);
    Ok(())
}

#[test]
fn delete_moves_the_directory_into_trash() -> TestResult {
    let root = tempfile::tempdir()?;
    let manager = open(root.path());
    let first = manager.create_tasks(vec![config_map(json!({}))], "doomed", &TaskOptions::default())?;
    assert!(manager.delete(&first[0].id));
    assert!(!root.path().join("doomed").exists());
    assert!(root.path().join(".trash/doomed/task_info.json").exists());
    assert!(manager.get(&first[0].id).is_none());
    assert!(!manager.delete(&first[0].id));

    // Same name again: the trashed copy gets a suffix.
    let second = manager.create_tasks(vec![config_map(json!({}))], "doomed", &TaskOptions::default())?;
    assert!(manager.delete(&second[0].id));
    let trashed: Vec<String> = fs::read_dir(root.path().join(".trash"))?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    assert_eq!(trashed.len(), 2);
    assert!(trashed.iter().any(|n| n.starts_with("doomed_")));

    // A rescan does not pick trashed tasks up again.
    assert_eq!(manager.scan_disk(), 0);
    Ok(())
}

#[test]
fn delete_refuses_running_tasks() -> TestResult {
    let root = tempfile::tempdir()?;
    TaskDirBuilder::new(root.path(), "busy")
        .status(TaskStatus::Queued)
        .run_index(1)
        .write();
    let manager = open(root.path());
    manager.set_processing(true);
    let dispatch = manager.pick_next().unwrap();
    assert_eq!(dispatch.task_id, "id-busy");

    assert!(!manager.delete("id-busy"));
    assert!(root.path().join("busy").exists());
    Ok(())
}

#[test]
fn pin_and_env_are_persisted() -> TestResult {
    let root = tempfile::tempdir()?;
    let dir = TaskDirBuilder::new(root.path(), "keeper").write();
    let manager = open(root.path());

    assert!(manager.set_pinned("id-keeper", true));
    let env = BTreeMap::from([("CUDA_VISIBLE_DEVICES".to_string(), "1".to_string())]);
    assert!(manager.set_env("id-keeper", env.clone()));
    assert!(!manager.set_pinned("id-missing", true));

    let rec = load_record(&dir)?;
    assert!(rec.pinned);
    assert_eq!(rec.env, env);

    // Survives a fresh manager.
    let reopened = open(root.path());
    assert!(reopened.get("id-keeper").unwrap().pinned);
    Ok(())
}

#[test]
fn find_resolves_ids_names_and_unique_prefixes() -> TestResult {
    let root = tempfile::tempdir()?;
    TaskDirBuilder::new(root.path(), "alpha").id("abc123").write();
    TaskDirBuilder::new(root.path(), "beta").id("abd456").write();
    let manager = open(root.path());

    assert_eq!(manager.find("abc123").unwrap().name, "alpha");
    assert_eq!(manager.find("beta").unwrap().id, "abd456");
    assert_eq!(manager.find("abd").unwrap().name, "beta");
    assert!(manager.find("ab").is_none(), "ambiguous prefix");
    assert!(manager.find("").is_none());
    assert!(manager.find("zzz").is_none());
    Ok(())
}

#[test]
fn pick_next_respects_processing_and_worker_limit() -> TestResult {
    let root = tempfile::tempdir()?;
    for name in ["a", "b", "c"] {
        TaskDirBuilder::new(root.path(), name).write();
    }
    let manager = open(root.path());
    let ids: Vec<String> = manager.tasks().into_iter().map(|t| t.id).collect();
    manager.enqueue(&ids);

    assert!(manager.pick_next().is_none(), "not processing");
    manager.set_processing(true);
    assert!(manager.pick_next().is_some());
    assert!(manager.pick_next().is_none(), "single worker busy");

    manager.set_pool(ExecutionMode::Process, 0);
    assert_eq!(manager.pool().max_workers, 1);
    manager.set_pool(ExecutionMode::Process, 3);
    assert!(manager.pick_next().is_some());
    assert!(manager.pick_next().is_some());
    assert!(manager.pick_next().is_none(), "queue drained");
    assert_eq!(manager.running_count(), 3);
    assert!(!manager.is_idle());
    Ok(())
}

#[cfg(unix)]
#[test]
fn cancel_after_dispatch_leaves_the_previous_runs_process_alone() -> TestResult {
    use std::time::Duration;

    // Stands in for an unrelated process that inherited the old pid.
    let mut bystander = std::process::Command::new("sleep").arg("30").spawn()?;
    let root = tempfile::tempdir()?;
    let dir = TaskDirBuilder::new(root.path(), "again")
        .status(TaskStatus::Completed)
        .completed_run(json!({}))
        .write();
    runpool::record::update_record(&dir, |r| r.pids = vec![Some(bystander.id())])?;

    let manager = open(root.path());
    assert!(manager.rerun("id-again"));
    manager.set_processing(true);
    let dispatch = manager.pick_next().unwrap();
    assert_eq!(dispatch.run_index, 2);
    // Canceled before the executor started a new process.
    assert!(manager.cancel("id-again"));

    std::thread::sleep(Duration::from_millis(100));
    let still_running = bystander.try_wait()?.is_none();
    bystander.kill()?;
    bystander.wait()?;
    assert!(still_running, "cancel signalled an unrelated process");

    let rec = load_record(&dir)?;
    assert_eq!(rec.status, TaskStatus::Failed);
    assert_eq!(rec.pids, vec![None]);
    Ok(())
}
