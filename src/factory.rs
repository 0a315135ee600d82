// src/factory.rs

//! Task Factory: allocate task directories and write their initial state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info};

use crate::errors::Result;
use crate::record::layout::{config_path, run_log_dir};
use crate::record::{ConfigMap, TaskRecord, save_record};

/// Config keys starting with this prefix are bookkeeping and never persisted.
const META_PREFIX: &str = "_meta";

/// How the tasks of one batch are executed.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub script: Option<String>,
    pub command: Option<String>,
    pub workdir: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// A task created on disk: its record and the directory holding it.
#[derive(Debug, Clone)]
pub struct CreatedTask {
    pub record: TaskRecord,
    pub dir: PathBuf,
}

pub struct TaskFactory {
    root: PathBuf,
}

impl TaskFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create one `pending` task per config.
    ///
    /// Names are `prefix` for a single config and `prefix-[i-of-N]` for a
    /// batch. An empty prefix becomes `task_<timestamp>`.
    pub fn create(
        &self,
        configs: Vec<ConfigMap>,
        prefix: &str,
        options: &TaskOptions,
    ) -> Result<Vec<CreatedTask>> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating task root {:?}", self.root))?;

        let prefix = match prefix.trim() {
            "" => format!("task_{}", chrono::Local::now().format("%Y%m%d_%H%M%S")),
            p => p.to_string(),
        };
        let total = configs.len();
        let mut created = Vec::with_capacity(total);

        for (i, config) in configs.into_iter().enumerate() {
            let base = if total > 1 {
                format!("{prefix}-[{}-of-{total}]", i + 1)
            } else {
                prefix.clone()
            };
            let task = self.create_one(&base, strip_meta(config), options)?;
            created.push(task);
        }

        info!(prefix = %prefix, count = created.len(), "created tasks");
        Ok(created)
    }

    fn create_one(
        &self,
        base: &str,
        config: ConfigMap,
        options: &TaskOptions,
    ) -> Result<CreatedTask> {
        let (name, dir) = self.allocate_dir(base)?;

        let mut record = TaskRecord::new(uuid::Uuid::new_v4().to_string(), &name, config);
        record.script = options.script.clone();
        record.command = options.command.clone();
        record.workdir = options.workdir.clone();
        record.env = options.env.clone();

        fs::create_dir_all(run_log_dir(&dir))
            .with_context(|| format!("creating log dir in {:?}", dir))?;
        let yaml = serde_yaml::to_string(&record.config)?;
        fs::write(config_path(&dir), yaml)
            .with_context(|| format!("writing config in {:?}", dir))?;
        save_record(&dir, &record)?;

        debug!(task = %name, task_id = %record.id, "task directory written");
        Ok(CreatedTask { record, dir })
    }

    /// Claim a fresh directory for `base`, suffixing `_<millis>` on collision.
    fn allocate_dir(&self, base: &str) -> Result<(String, PathBuf)> {
        let mut name = base.to_string();
        loop {
            let dir = self.root.join(&name);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((name, dir)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let millis = chrono::Local::now().timestamp_millis();
                    name = format!("{base}_{millis}");
                    if self.root.join(&name).exists() {
                        std::thread::sleep(std::time::Duration::from_millis(1));
                    }
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("creating task dir {:?}", dir))
                        .into());
                }
            }
        }
    }
}

fn strip_meta(mut config: ConfigMap) -> ConfigMap {
    config.retain(|k, _| !k.starts_with(META_PREFIX));
    config
}
