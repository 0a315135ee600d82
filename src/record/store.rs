// src/record/store.rs

//! Read / write of `task_info.json`.
//!
//! Writes go to a sibling temp file which is then renamed over the record,
//! so a concurrent reader sees either the old or the new document. There is
//! no cross-process locking: two writers doing read-modify-write on the same
//! record can still lose an update.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::record::layout::info_path;
use crate::record::model::TaskRecord;

/// Load the record of `task_dir`.
pub fn load_record(task_dir: &Path) -> Result<TaskRecord> {
    let path = info_path(task_dir);
    let contents =
        fs::read_to_string(&path).with_context(|| format!("reading record {:?}", path))?;
    let record: TaskRecord =
        serde_json::from_str(&contents).with_context(|| format!("parsing record {:?}", path))?;
    Ok(record)
}

/// Replace the record of `task_dir` with `record`.
pub fn save_record(task_dir: &Path, record: &TaskRecord) -> Result<()> {
    let path = info_path(task_dir);
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(record).context("serializing record")?;

    {
        let mut file =
            fs::File::create(&tmp).with_context(|| format!("creating {:?}", tmp))?;
        file.write_all(&body)
            .with_context(|| format!("writing {:?}", tmp))?;
        file.flush()?;
    }

    fs::rename(&tmp, &path).with_context(|| format!("replacing record {:?}", path))?;
    Ok(())
}

/// Read-modify-write: load the record, apply `f`, save it and return the
/// updated copy.
pub fn update_record<F>(task_dir: &Path, f: F) -> Result<TaskRecord>
where
    F: FnOnce(&mut TaskRecord),
{
    let mut record = load_record(task_dir)?;
    f(&mut record);
    save_record(task_dir, &record)?;
    Ok(record)
}
