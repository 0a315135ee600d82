use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::sync::mpsc;

use runpool::engine::{RuntimeEvent, TaskOutcome};
use runpool::errors::Result;
use runpool::exec::{BackendFactory, ExecutorBackend, WorkUnit};
use runpool::record::{now_timestamp, update_record};
use runpool::types::{ExecutionMode, TaskStatus};

#[derive(Default)]
struct FakeState {
    dispatched: Mutex<Vec<WorkUnit>>,
    builds: Mutex<Vec<(ExecutionMode, usize)>>,
    events: Mutex<Option<mpsc::Sender<RuntimeEvent>>>,
    fail_dispatch: AtomicBool,
}

/// Handle shared between a test and the fake backends the runtime builds.
///
/// Dispatched units are only recorded; the test decides when and how each
/// one finishes.
#[derive(Clone, Default)]
pub struct FakeControl {
    state: Arc<FakeState>,
}

impl FakeControl {
    pub fn dispatched(&self) -> Vec<WorkUnit> {
        self.state.dispatched.lock().unwrap().clone()
    }

    pub fn builds(&self) -> Vec<(ExecutionMode, usize)> {
        self.state.builds.lock().unwrap().clone()
    }

    /// Make every following dispatch fail.
    pub fn fail_dispatch(&self, fail: bool) {
        self.state.fail_dispatch.store(fail, Ordering::SeqCst);
    }

    fn sender(&self) -> mpsc::Sender<RuntimeEvent> {
        self.state
            .events
            .lock()
            .unwrap()
            .clone()
            .expect("no backend built yet")
    }

    /// Finish `unit` the way the executor would: write the final record,
    /// then report the outcome.
    pub async fn complete(&self, unit: &WorkUnit, success: bool) {
        update_record(&unit.dir, |r| {
            r.run_index = None;
            if success {
                r.status = TaskStatus::Completed;
                r.progress = 1.0;
                r.start_times.push(now_timestamp());
                r.finish_times.push(now_timestamp());
                let runs = r.start_times.len();
                r.pad_monitors(runs);
            } else {
                r.status = TaskStatus::Failed;
                r.progress = 0.0;
            }
        })
        .expect("update record");

        let outcome = if success {
            TaskOutcome::Completed
        } else {
            TaskOutcome::Failed(1)
        };
        let sender = self.sender();
        sender
            .send(RuntimeEvent::TaskFinished {
                task_id: unit.task_id.clone(),
                result: Ok(outcome),
            })
            .await
            .expect("runtime gone");
    }

    /// Report an executor-level failure without touching the record.
    pub async fn crash(&self, unit: &WorkUnit, message: &str) {
        let sender = self.sender();
        sender
            .send(RuntimeEvent::TaskFinished {
                task_id: unit.task_id.clone(),
                result: Err(message.to_string()),
            })
            .await
            .expect("runtime gone");
    }
}

pub struct FakeBackendFactory {
    control: FakeControl,
}

impl FakeBackendFactory {
    pub fn new(control: FakeControl) -> Self {
        Self { control }
    }
}

impl BackendFactory for FakeBackendFactory {
    fn build(
        &self,
        mode: ExecutionMode,
        workers: usize,
        events: mpsc::Sender<RuntimeEvent>,
    ) -> Result<Box<dyn ExecutorBackend>> {
        self.control.state.builds.lock().unwrap().push((mode, workers));
        *self.control.state.events.lock().unwrap() = Some(events);
        Ok(Box::new(FakeBackend {
            mode,
            workers,
            control: self.control.clone(),
        }))
    }
}

pub struct FakeBackend {
    mode: ExecutionMode,
    workers: usize,
    control: FakeControl,
}

impl ExecutorBackend for FakeBackend {
    fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn dispatch(
        &mut self,
        unit: WorkUnit,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let control = self.control.clone();
        Box::pin(async move {
            if control.state.fail_dispatch.load(Ordering::SeqCst) {
                return Err(anyhow!("pool refused {}", unit.name).into());
            }
            control.state.dispatched.lock().unwrap().push(unit);
            Ok(())
        })
    }
}
