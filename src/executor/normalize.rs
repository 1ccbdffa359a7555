//! Return-shape normalization for entry-function values.
//!
//! Generated code returns one of two sanctioned shapes: a bare list of
//! records, or a dict with a `data` list plus optional metadata. Anything
//! else becomes a per-target failure naming the unexpected shape; the
//! overall run keeps going.

use std::time::Duration;

use serde_json::Value;

use crate::model::{Confidence, SourceOutcome};

/// Interpret a raw entry-function return for one target.
///
/// Returns the per-target outcome together with the records the target
/// contributed (empty when it failed).
pub fn normalize_return(
    target: &str,
    raw: Value,
    duration: Duration,
) -> (SourceOutcome, Vec<Value>) {
    match raw {
        Value::Null => (
            SourceOutcome::failure(target, "entry function returned no value", duration),
            Vec::new(),
        ),
        Value::Array(records) => {
            let outcome = SourceOutcome {
                target: target.to_string(),
                succeeded: true,
                record_count: records.len(),
                filtered_count: 0,
                duplicate_count: 0,
                error: None,
                duration,
                method_used: "unknown".to_string(),
                confidence: Confidence::Medium,
            };
            (outcome, records)
        }
        Value::Object(map) => normalize_structured(target, map, duration),
        other => (
            SourceOutcome::failure(
                target,
                format!(
                    "entry function returned {} instead of a record list or result dict",
                    shape_name(&other)
                ),
                duration,
            ),
            Vec::new(),
        ),
    }
}

/// The dict shape: `data` is required and must be a list; `error`,
/// `filtered_count`, `duplicate_count`, `method`, and `confidence` are
/// optional, either at the top level or inside a nested `metadata` dict.
fn normalize_structured(
    target: &str,
    map: serde_json::Map<String, Value>,
    duration: Duration,
) -> (SourceOutcome, Vec<Value>) {
    let reported_error = meta_field(&map, "error")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);

    let records = match map.get("data") {
        Some(Value::Array(records)) => records.clone(),
        Some(other) => {
            return (
                SourceOutcome::failure(
                    target,
                    format!("result dict's 'data' is {} instead of a list", shape_name(other)),
                    duration,
                ),
                Vec::new(),
            );
        }
        None => {
            let message = reported_error
                .unwrap_or_else(|| "result dict has no 'data' list".to_string());
            return (SourceOutcome::failure(target, message, duration), Vec::new());
        }
    };

    if let Some(message) = reported_error {
        return (SourceOutcome::failure(target, message, duration), Vec::new());
    }

    let outcome = SourceOutcome {
        target: target.to_string(),
        succeeded: true,
        record_count: records.len(),
        filtered_count: count_field(&map, "filtered_count"),
        duplicate_count: count_field(&map, "duplicate_count"),
        error: None,
        duration,
        method_used: meta_field(&map, "method")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        confidence: meta_field(&map, "confidence")
            .and_then(Value::as_str)
            .map(Confidence::parse)
            .unwrap_or_default(),
    };
    (outcome, records)
}

/// Look a key up at the top level first, then inside `metadata`.
fn meta_field<'a>(map: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).or_else(|| {
        map.get("metadata")
            .and_then(Value::as_object)
            .and_then(|meta| meta.get(key))
    })
}

fn count_field(map: &serde_json::Map<String, Value>, key: &str) -> usize {
    meta_field(map, key)
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(0)
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a dict",
    }
}
