// src/engine/runtime.rs

//! Async control loop.
//!
//! Admits queued tasks into the executor backend while worker slots are
//! free, and reconciles completions reported on the event channel. Wakes up
//! on completions, on manager state changes, and at least once per poll
//! interval (to mirror executor progress from disk).

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::engine::core::PoolConfig;
use crate::engine::{RuntimeEvent, RuntimeOptions, TaskManager};
use crate::errors::Result;
use crate::exec::{BackendFactory, ExecutorBackend, WorkUnit};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct Runtime<F: BackendFactory> {
    manager: TaskManager,
    factory: F,
    backend: Option<Box<dyn ExecutorBackend>>,
    event_tx: mpsc::Sender<RuntimeEvent>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    interpreter: String,
    poll_interval: Duration,
    options: RuntimeOptions,
}

impl<F: BackendFactory> fmt::Debug for Runtime<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("manager", &self.manager)
            .field("interpreter", &self.interpreter)
            .field("poll_interval", &self.poll_interval)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<F: BackendFactory> Runtime<F> {
    pub fn new(
        manager: TaskManager,
        factory: F,
        interpreter: impl Into<String>,
        poll_interval: Duration,
        options: RuntimeOptions,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            manager,
            factory,
            backend: None,
            event_tx,
            event_rx,
            interpreter: interpreter.into(),
            poll_interval,
            options,
        }
    }

    /// Sender for injecting events (e.g. shutdown on Ctrl-C).
    pub fn event_sender(&self) -> mpsc::Sender<RuntimeEvent> {
        self.event_tx.clone()
    }

    /// Main loop. Returns on shutdown, or once idle with `exit_when_idle`.
    pub async fn run(mut self) -> Result<()> {
        info!(
            interpreter = %self.interpreter,
            poll_ms = self.poll_interval.as_millis() as u64,
            "runtime started"
        );

        loop {
            self.admit().await;

            if self.options.exit_when_idle && self.manager.is_idle() {
                info!("no queued or running tasks left; stopping runtime");
                break;
            }

            tokio::select! {
                event = self.event_rx.recv() => match event {
                    Some(RuntimeEvent::TaskFinished { task_id, result }) => {
                        self.manager.on_task_done(&task_id, &result);
                    }
                    Some(RuntimeEvent::ShutdownRequested) => {
                        info!("shutdown requested; stopping runtime");
                        break;
                    }
                    None => break,
                },
                _ = self.manager.changed() => {}
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.manager.refresh_from_disk();
                }
            }
        }

        info!("runtime exiting");
        Ok(())
    }

    /// Dispatch queued tasks until the pool is full or nothing is queued.
    async fn admit(&mut self) {
        if !self.manager.is_processing() {
            return;
        }
        let pool = self.manager.pool();
        if let Err(e) = self.ensure_backend(pool) {
            error!(error = %e, "could not create worker pool; pausing admission");
            self.manager.set_processing(false);
            return;
        }
        let Some(backend) = self.backend.as_mut() else {
            return;
        };

        while let Some(dispatch) = self.manager.pick_next() {
            let unit = WorkUnit {
                task_id: dispatch.task_id.clone(),
                name: dispatch.name.clone(),
                dir: dispatch.dir,
                run_index: dispatch.run_index,
                interpreter: self.interpreter.clone(),
            };
            debug!(
                task = %dispatch.name,
                run_index = dispatch.run_index,
                "dispatching task"
            );
            if let Err(e) = backend.dispatch(unit).await {
                error!(task = %dispatch.name, error = %e, "dispatch failed; marking task failed");
                self.manager.revert_dispatch(&dispatch.task_id);
            }
        }
    }

    /// (Re)build the backend when the mode or worker count changed.
    fn ensure_backend(&mut self, pool: PoolConfig) -> Result<()> {
        let current = self
            .backend
            .as_ref()
            .map(|b| (b.mode(), b.workers()));
        if current == Some((pool.mode, pool.max_workers)) {
            return Ok(());
        }
        info!(
            mode = %pool.mode,
            workers = pool.max_workers,
            "creating worker pool"
        );
        self.backend = Some(
            self.factory
                .build(pool.mode, pool.max_workers, self.event_tx.clone())?,
        );
        Ok(())
    }
}
