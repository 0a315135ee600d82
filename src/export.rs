// src/export.rs

//! Read-only exports of per-run monitor data.

use serde_json::{Value, json};

use crate::record::TaskRecord;

const PRIORITY_COLUMNS: [&str; 5] = ["name", "status", "run", "start_time", "finish_time"];

/// JSON array with one entry per task that has monitor data.
pub fn build_export_json(tasks: &[TaskRecord]) -> Value {
    Value::Array(
        tasks
            .iter()
            .filter(|t| !t.monitors.is_empty())
            .map(|t| {
                json!({
                    "task_name": t.name,
                    "task_id": t.id,
                    "monitor": t.monitors,
                })
            })
            .collect(),
    )
}

/// CSV with one row per task per successful run (at least one row per
/// task). Identity columns come first, then monitor keys sorted by name.
/// Pids are left out: they count failed attempts too and are released once
/// a process exits.
pub fn build_export_csv(tasks: &[TaskRecord]) -> String {
    let mut rows: Vec<Vec<(String, String)>> = Vec::new();
    let mut monitor_keys: Vec<String> = Vec::new();

    for t in tasks {
        let runs = t.start_times.len().max(1);
        for i in 0..runs {
            let mut row = vec![
                ("name".to_string(), t.name.clone()),
                ("status".to_string(), t.status.to_string()),
                ("run".to_string(), (i + 1).to_string()),
                ("start_time".to_string(), t.start_times.get(i).cloned().unwrap_or_default()),
                ("finish_time".to_string(), t.finish_times.get(i).cloned().unwrap_or_default()),
            ];
            if let Some(entry) = t.monitors.get(i) {
                for (k, v) in entry {
                    if PRIORITY_COLUMNS.contains(&k.as_str()) {
                        continue;
                    }
                    if !monitor_keys.contains(k) {
                        monitor_keys.push(k.clone());
                    }
                    row.push((k.clone(), cell_text(v)));
                }
            }
            rows.push(row);
        }
    }

    if rows.is_empty() {
        return String::new();
    }
    monitor_keys.sort();

    let columns: Vec<&str> = PRIORITY_COLUMNS
        .iter()
        .copied()
        .chain(monitor_keys.iter().map(String::as_str))
        .collect();

    let mut out = columns
        .iter()
        .map(|c| escape_csv(c))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str("\r\n");

    for row in rows {
        let line = columns
            .iter()
            .map(|col| {
                row.iter()
                    .find(|(k, _)| k == col)
                    .map(|(_, v)| escape_csv(v))
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push_str("\r\n");
    }
    out
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
