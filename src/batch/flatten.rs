// src/batch/flatten.rs

//! Dotted-key flattening of nested config mappings.

use serde_json::Value;

use crate::record::ConfigMap;

/// Flatten nested objects into `(dotted.key, leaf)` pairs, in key order.
///
/// Empty objects are kept as leaves so they survive a round trip.
pub fn flatten(config: &ConfigMap) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into(config, "", &mut out);
    out
}

fn flatten_into(map: &ConfigMap, prefix: &str, out: &mut Vec<(String, Value)>) {
    for (k, v) in map {
        let key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        match v {
            Value::Object(inner) if !inner.is_empty() => flatten_into(inner, &key, out),
            other => out.push((key, other.clone())),
        }
    }
}

/// Rebuild a nested mapping from dotted keys.
pub fn unflatten<I>(pairs: I) -> ConfigMap
where
    I: IntoIterator<Item = (String, Value)>,
{
    let mut root = ConfigMap::new();
    for (key, value) in pairs {
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &parts, value);
    }
    root
}

fn insert_path(map: &mut ConfigMap, parts: &[&str], value: Value) {
    match parts {
        [] => {}
        [last] => {
            map.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(ConfigMap::new()));
            if !entry.is_object() {
                *entry = Value::Object(ConfigMap::new());
            }
            if let Value::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_nested_config() {
        let cfg = json!({
            "lr": 0.1,
            "model": {"name": "resnet", "opt": {"beta": 0.9}},
            "empty": {}
        });
        let map = cfg.as_object().unwrap();
        let flat = flatten(map);
        let keys: Vec<&str> = flat.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["lr", "model.name", "model.opt.beta", "empty"]);
        assert_eq!(&unflatten(flat), map);
    }
}
