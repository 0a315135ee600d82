// src/batch/parse.rs

//! Pipe-syntax mini-language for sweep templates.
//!
//! ```text
//! lr:    0.001 | 0.01 | 0.1      product (cartesian)
//! seed:  (1 | 2 | 3)             zip (positional, equal lengths)
//! step:  0:10:2                  range, stop exclusive -> 0, 2, 4, 6, 8
//! step:  (0, 10, 2)              same range, tuple form
//! tag:   a\|b                    literal pipe
//! ```

use serde_json::{Number, Value};

/// How a leaf participates in the expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    Product,
    Zip,
}

/// A leaf that expands to several values.
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
    pub mode: SweepMode,
    pub values: Vec<Value>,
}

/// Classification of one config leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
    /// Expands to several values.
    Sweep(Sweep),
    /// Contains only escaped pipes: a single value with `\|` turned into `|`.
    Escaped(Value),
    /// No pipe syntax at all.
    Fixed,
}

const PIPE: char = '|';
const ESCAPE: char = '\\';

/// Decimal places kept when generating float ranges.
const RANGE_PRECISION: f64 = 1e10;

/// Slack applied before rounding a float range length up, so that
/// `0:0.3:0.1` does not grow a fourth value from representation error.
const RANGE_EPSILON: f64 = 1e-9;

/// Upper bound on values produced by one range leaf.
const MAX_RANGE_LEN: usize = 100_000;

/// Classify a leaf value. Only strings can carry pipe syntax.
pub fn classify(value: &Value) -> Leaf {
    let Value::String(raw) = value else {
        return Leaf::Fixed;
    };
    let s = raw.trim();

    if let Some(values) = parse_range(s) {
        return Leaf::Sweep(Sweep {
            mode: SweepMode::Product,
            values,
        });
    }

    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        let inner = &s[1..s.len() - 1];
        if let Some(parts) = split_unescaped(inner) {
            return Leaf::Sweep(Sweep {
                mode: SweepMode::Zip,
                values: parts.iter().map(|p| parse_scalar(p)).collect(),
            });
        }
    }

    if let Some(parts) = split_unescaped(s) {
        return Leaf::Sweep(Sweep {
            mode: SweepMode::Product,
            values: parts.iter().map(|p| parse_scalar(p)).collect(),
        });
    }

    if raw.contains("\\|") {
        return Leaf::Escaped(parse_scalar(&unescape(s)));
    }

    Leaf::Fixed
}

/// Split on unescaped pipes. Returns `None` unless at least two non-empty
/// parts result. Parts are trimmed and unescaped.
fn split_unescaped(s: &str) -> Option<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut saw_pipe = false;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE if chars.peek() == Some(&PIPE) => {
                current.push(PIPE);
                chars.next();
            }
            PIPE => {
                saw_pipe = true;
                parts.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    parts.push(current);

    if !saw_pipe {
        return None;
    }

    let parts: Vec<String> = parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    if parts.len() > 1 { Some(parts) } else { None }
}

fn unescape(s: &str) -> String {
    s.replace("\\|", "|")
}

/// Parse `start:stop[:step]` or `(start, stop[, step])` into its values.
///
/// All parts must be numeric. Integer parts give integers, otherwise floats.
/// A zero step or an empty range is not treated as range syntax.
fn parse_range(s: &str) -> Option<Vec<Value>> {
    let parts: Vec<&str> = if s.starts_with('(') && s.ends_with(')') && s.contains(',') {
        s[1..s.len() - 1].split(',').map(str::trim).collect()
    } else if s.contains(':') && !s.contains(PIPE) {
        s.split(':').map(str::trim).collect()
    } else {
        return None;
    };

    if !(2..=3).contains(&parts.len()) || parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    if let Some(ints) = parts
        .iter()
        .map(|p| p.parse::<i64>().ok())
        .collect::<Option<Vec<i64>>>()
    {
        let (start, stop) = (ints[0], ints[1]);
        let step = ints.get(2).copied().unwrap_or(1);
        return int_range(start, stop, step);
    }

    let floats = parts
        .iter()
        .map(|p| p.parse::<f64>().ok().filter(|f| f.is_finite()))
        .collect::<Option<Vec<f64>>>()?;
    let (start, stop) = (floats[0], floats[1]);
    let step = floats.get(2).copied().unwrap_or(1.0);
    float_range(start, stop, step)
}

fn int_range(start: i64, stop: i64, step: i64) -> Option<Vec<Value>> {
    if step == 0 {
        return None;
    }
    let mut values = Vec::new();
    let mut cur = start;
    while (step > 0 && cur < stop) || (step < 0 && cur > stop) {
        values.push(Value::from(cur));
        if values.len() > MAX_RANGE_LEN {
            return None;
        }
        cur = cur.checked_add(step)?;
    }
    if values.is_empty() { None } else { Some(values) }
}

fn float_range(start: f64, stop: f64, step: f64) -> Option<Vec<Value>> {
    if step == 0.0 {
        return None;
    }
    let count = ((stop - start) / step - RANGE_EPSILON).ceil();
    if !(count >= 1.0) || count > MAX_RANGE_LEN as f64 {
        return None;
    }
    let values = (0..count as usize)
        .map(|i| {
            let v = start + step * i as f64;
            let rounded = (v * RANGE_PRECISION).round() / RANGE_PRECISION;
            Number::from_f64(rounded).map(Value::Number).unwrap_or(Value::Null)
        })
        .collect();
    Some(values)
}

/// Type a single textual value: integer, float, boolean, null, quoted
/// string, JSON list/map, otherwise the trimmed string.
pub fn parse_scalar(raw: &str) -> Value {
    let s = raw.trim();

    if let Ok(i) = s.parse::<i64>() {
        return Value::from(i);
    }
    if looks_numeric(s) {
        if let Some(n) = s.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }

    match s.to_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "none" | "~" => return Value::Null,
        _ => {}
    }

    if s.len() >= 2 {
        let quoted = (s.starts_with('"') && s.ends_with('"'))
            || (s.starts_with('\'') && s.ends_with('\''));
        if quoted {
            return Value::String(s[1..s.len() - 1].to_string());
        }
    }

    if (s.starts_with('[') && s.ends_with(']')) || (s.starts_with('{') && s.ends_with('}')) {
        if let Ok(v) = serde_json::from_str::<Value>(s) {
            return v;
        }
    }

    Value::String(s.to_string())
}

/// Rejects words Rust's float parser accepts (`inf`, `NaN`, ...).
fn looks_numeric(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        && s.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sweep(v: &str) -> Sweep {
        match classify(&json!(v)) {
            Leaf::Sweep(s) => s,
            other => panic!("expected sweep for {v:?}, got {other:?}"),
        }
    }

    #[test]
    fn bare_pipes_are_product() {
        let s = sweep("0.001 | 0.01 | 0.1");
        assert_eq!(s.mode, SweepMode::Product);
        assert_eq!(s.values, vec![json!(0.001), json!(0.01), json!(0.1)]);
    }

    #[test]
    fn parenthesized_pipes_are_zip() {
        let s = sweep("(1 | 2 | 3)");
        assert_eq!(s.mode, SweepMode::Zip);
        assert_eq!(s.values, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn single_part_is_not_a_sweep() {
        assert_eq!(classify(&json!("a |")), Leaf::Fixed);
        assert_eq!(classify(&json!("(only)")), Leaf::Fixed);
        assert_eq!(classify(&json!(42)), Leaf::Fixed);
    }

    #[test]
    fn escaped_pipes_are_literal() {
        let s = sweep(r"a\|b | c");
        assert_eq!(s.values, vec![json!("a|b"), json!("c")]);
        assert_eq!(classify(&json!(r"x\|y")), Leaf::Escaped(json!("x|y")));
    }

    #[test]
    fn integer_ranges_exclude_stop() {
        assert_eq!(sweep("0:10:3").values, vec![json!(0), json!(3), json!(6), json!(9)]);
        assert_eq!(sweep("(1, 4)").values, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(sweep("3:0:-1").values, vec![json!(3), json!(2), json!(1)]);
    }

    #[test]
    fn float_ranges_are_rounded() {
        assert_eq!(
            sweep("0:1:0.25").values,
            vec![json!(0.0), json!(0.25), json!(0.5), json!(0.75)]
        );
        assert_eq!(sweep("0.1:0.4:0.1").values.len(), 3);
    }

    #[test]
    fn non_numeric_colons_are_fixed() {
        assert_eq!(classify(&json!("12:30pm")), Leaf::Fixed);
        assert_eq!(classify(&json!("http://host:80")), Leaf::Fixed);
        assert_eq!(classify(&json!("5:1")), Leaf::Fixed);
        assert_eq!(classify(&json!("0:4:0")), Leaf::Fixed);
    }

    #[test]
    fn scalars_are_typed() {
        assert_eq!(parse_scalar("42"), json!(42));
        assert_eq!(parse_scalar("1e-3"), json!(0.001));
        assert_eq!(parse_scalar("True"), json!(true));
        assert_eq!(parse_scalar("None"), Value::Null);
        assert_eq!(parse_scalar("'adam'"), json!("adam"));
        assert_eq!(parse_scalar("[1, 2]"), json!([1, 2]));
        assert_eq!(parse_scalar("inf"), json!("inf"));
        assert_eq!(parse_scalar(" resnet "), json!("resnet"));
    }
}
