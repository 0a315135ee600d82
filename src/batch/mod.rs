// src/batch/mod.rs

//! Batch config generation: one template, many task configs.
//!
//! - [`parse`] classifies leaves (`a | b` product, `(a | b)` zip, ranges,
//!   escaped pipes) and types the split values.
//! - [`flatten`] converts between nested mappings and dotted leaves.
//!
//! Total configs = ∏(product leaf sizes) × (common zip length). Product
//! combinations form the outer loop, zip combinations the inner loop, and
//! the first product key varies slowest.

pub mod flatten;
pub mod parse;

use serde_json::Value;

use crate::errors::{Result, RunpoolError};
use crate::record::ConfigMap;

use self::flatten::{flatten, unflatten};
use self::parse::{Leaf, SweepMode, classify};

/// One expanded config plus a short `key=value, ...` description of the
/// values that distinguish it from its siblings.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedConfig {
    pub config: ConfigMap,
    pub description: String,
}

/// Per-leaf plan used while expanding.
enum Slot {
    Fixed(Value),
    Product(usize),
    Zip(usize),
}

struct Plan {
    slots: Vec<(String, Slot)>,
    product: Vec<(String, Vec<Value>)>,
    zip: Vec<(String, Vec<Value>)>,
    has_escapes: bool,
}

impl Plan {
    fn build(base: &ConfigMap) -> Self {
        let mut plan = Plan {
            slots: Vec::new(),
            product: Vec::new(),
            zip: Vec::new(),
            has_escapes: false,
        };

        for (key, value) in flatten(base) {
            let slot = match classify(&value) {
                Leaf::Sweep(sweep) => match sweep.mode {
                    SweepMode::Product => {
                        plan.product.push((key.clone(), sweep.values));
                        Slot::Product(plan.product.len() - 1)
                    }
                    SweepMode::Zip => {
                        plan.zip.push((key.clone(), sweep.values));
                        Slot::Zip(plan.zip.len() - 1)
                    }
                },
                Leaf::Escaped(v) => {
                    plan.has_escapes = true;
                    Slot::Fixed(v)
                }
                Leaf::Fixed => Slot::Fixed(value),
            };
            plan.slots.push((key, slot));
        }

        plan
    }

    fn is_plain(&self) -> bool {
        self.product.is_empty() && self.zip.is_empty() && !self.has_escapes
    }

    /// Common zip length, or the mismatch description.
    fn zip_len(&self) -> std::result::Result<usize, String> {
        let Some((_, first)) = self.zip.first() else {
            return Ok(1);
        };
        if self.zip.iter().all(|(_, v)| v.len() == first.len()) {
            Ok(first.len())
        } else {
            Err(self
                .zip
                .iter()
                .map(|(k, v)| format!("{k}={}", v.len()))
                .collect::<Vec<_>>()
                .join(", "))
        }
    }

    fn product_len(&self) -> Option<usize> {
        self.product
            .iter()
            .try_fold(1usize, |acc, (_, v)| acc.checked_mul(v.len()))
    }
}

/// Expand `base` into every combination its pipe syntax describes.
///
/// Without any pipe syntax the input itself is returned as the single
/// element (moved, not copied).
///
/// Fails with [`RunpoolError::BatchError`] when zip leaves have different
/// lengths.
pub fn generate_batch_configs(base: ConfigMap) -> Result<Vec<GeneratedConfig>> {
    let plan = Plan::build(&base);
    if plan.is_plain() {
        return Ok(vec![GeneratedConfig {
            config: base,
            description: String::new(),
        }]);
    }

    let zip_len = plan.zip_len().map_err(|detail| {
        RunpoolError::BatchError(format!(
            "all (zip) parameters must have equal length. Got: {detail}"
        ))
    })?;
    let product_len = plan
        .product_len()
        .ok_or_else(|| RunpoolError::BatchError("batch expansion is too large".to_string()))?;

    let mut configs = Vec::with_capacity(product_len.saturating_mul(zip_len));
    let mut product_idx = vec![0usize; plan.product.len()];

    for p in 0..product_len {
        // Mixed-radix decode: the first product key varies slowest.
        let mut rem = p;
        for (slot, (_, values)) in product_idx.iter_mut().zip(&plan.product).rev() {
            *slot = rem % values.len();
            rem /= values.len();
        }

        for z in 0..zip_len {
            configs.push(materialize(&plan, &product_idx, z));
        }
    }

    Ok(configs)
}

fn materialize(plan: &Plan, product_idx: &[usize], zip_idx: usize) -> GeneratedConfig {
    let pairs = plan.slots.iter().map(|(key, slot)| {
        let value = match slot {
            Slot::Fixed(v) => v.clone(),
            Slot::Product(i) => plan.product[*i].1[product_idx[*i]].clone(),
            Slot::Zip(i) => plan.zip[*i].1[zip_idx].clone(),
        };
        (key.clone(), value)
    });
    let config = unflatten(pairs);

    let product_parts = plan
        .product
        .iter()
        .zip(product_idx)
        .map(|((k, values), &i)| describe(k, &values[i]));
    let zip_parts = plan.zip.iter().map(|(k, values)| describe(k, &values[zip_idx]));
    let description = product_parts.chain(zip_parts).collect::<Vec<_>>().join(", ");

    GeneratedConfig {
        config,
        description,
    }
}

fn describe(key: &str, value: &Value) -> String {
    let short = key.rsplit('.').next().unwrap_or(key);
    match value {
        Value::String(s) => format!("{short}={s}"),
        other => format!("{short}={other}"),
    }
}

/// Number of configs [`generate_batch_configs`] would produce, without
/// building them. Returns 0 for mismatched zip lengths.
pub fn count_batch_configs(base: &ConfigMap) -> usize {
    let plan = Plan::build(base);
    match plan.zip_len() {
        Ok(zip_len) => plan
            .product_len()
            .map(|p| p.saturating_mul(zip_len))
            .unwrap_or(usize::MAX),
        Err(_) => 0,
    }
}

/// Resolve every pipe leaf to its first value, for a single default config.
///
/// Equal to the first element of [`generate_batch_configs`] when that
/// succeeds.
pub fn strip_batch_pipes(config: &ConfigMap) -> ConfigMap {
    let plan = Plan::build(config);
    if plan.is_plain() {
        return config.clone();
    }

    unflatten(plan.slots.into_iter().map(|(key, slot)| {
        let value = match slot {
            Slot::Fixed(v) => v,
            Slot::Product(i) => plan.product[i].1[0].clone(),
            Slot::Zip(i) => plan.zip[i].1[0].clone(),
        };
        (key, value)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> ConfigMap {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn mixed_product_and_zip_cross_join() {
        let base = map(json!({
            "lr": "0.001 | 0.01",
            "seed": "(1 | 2 | 3)",
            "tag": "(a | b | c)",
            "epochs": 100
        }));
        assert_eq!(count_batch_configs(&base), 6);

        let out = generate_batch_configs(base).unwrap();
        assert_eq!(out.len(), 6);
        assert_eq!(out[0].config["lr"], json!(0.001));
        assert_eq!(out[0].config["seed"], json!(1));
        assert_eq!(out[0].config["tag"], json!("a"));
        assert_eq!(out[2].config["seed"], json!(3));
        assert_eq!(out[2].config["tag"], json!("c"));
        assert_eq!(out[3].config["lr"], json!(0.01));
        assert!(out.iter().all(|g| g.config["epochs"] == json!(100)));
        assert_eq!(out[4].description, "lr=0.01, seed=2, tag=b");
    }

    #[test]
    fn first_product_key_varies_slowest() {
        let base = map(json!({"a": "1 | 2", "b": "x | y"}));
        let out = generate_batch_configs(base).unwrap();
        let pairs: Vec<(Value, Value)> = out
            .iter()
            .map(|g| (g.config["a"].clone(), g.config["b"].clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (json!(1), json!("x")),
                (json!(1), json!("y")),
                (json!(2), json!("x")),
                (json!(2), json!("y")),
            ]
        );
    }

    #[test]
    fn nested_keys_keep_their_shape() {
        let base = map(json!({
            "model": {"name": "resnet | vgg", "depth": 50},
            "train": {"epochs": 10}
        }));
        let out = generate_batch_configs(base).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].config["model"]["name"], json!("vgg"));
        assert_eq!(out[1].config["model"]["depth"], json!(50));
        assert_eq!(out[1].config["train"]["epochs"], json!(10));
        assert_eq!(out[1].description, "name=vgg");
    }

    #[test]
    fn zip_length_mismatch_fails_and_counts_zero() {
        let base = map(json!({"a": "(1 | 2)", "b": "(x | y | z)"}));
        assert_eq!(count_batch_configs(&base), 0);
        let err = generate_batch_configs(base).unwrap_err();
        assert!(matches!(err, RunpoolError::BatchError(ref m) if m.contains("a=2")));
    }

    #[test]
    fn plain_config_is_returned_as_is() {
        let base = map(json!({"lr": 0.1, "name": "run"}));
        let out = generate_batch_configs(base.clone()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].config, base);
        assert_eq!(out[0].description, "");
        assert_eq!(count_batch_configs(&base), 1);
    }

    #[test]
    fn escaped_pipe_only_is_unescaped() {
        let base = map(json!({"sep": r"a\|b"}));
        let out = generate_batch_configs(base.clone()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].config["sep"], json!("a|b"));
        assert_eq!(strip_batch_pipes(&base)["sep"], json!("a|b"));
    }

    #[test]
    fn ranges_expand_as_product() {
        let base = map(json!({"bs": "16 | 32", "step": "0:3"}));
        assert_eq!(count_batch_configs(&base), 6);
    }

    #[test]
    fn strip_keeps_first_values() {
        let base = map(json!({
            "lr": "0.001 | 0.01",
            "seed": "(7 | 8)",
            "opt": {"beta": "0.9 | 0.99"},
            "fixed": "x"
        }));
        let stripped = strip_batch_pipes(&base);
        assert_eq!(
            Value::Object(stripped.clone()),
            json!({"lr": 0.001, "seed": 7, "opt": {"beta": 0.9}, "fixed": "x"})
        );
        let first = generate_batch_configs(base).unwrap().remove(0);
        assert_eq!(first.config, stripped);
    }
}
