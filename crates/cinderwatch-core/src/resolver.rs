//! Reference resolver for the source engine's compact execution blob.
//!
//! The source engine stores execution data as a flat array of values where
//! any string matching `^[0-9]+$` may be a pointer back into that same
//! array. This module is the only place that understands that format;
//! everything downstream consumes fully materialized `serde_json::Value`
//! trees.

use serde_json::Value;

/// Recursion depth past which we give up resolving and return the value
/// unresolved rather than risk a stack overflow on a cyclic blob.
const MAX_DEPTH: u32 = 10;

/// Resolve `value` against the containing array `arr`, recursively
/// materializing any numeric-string pointers.
///
/// Pure and side-effect-free. Never panics: on depth overflow it returns
/// the raw value rather than throwing, matching the source format's
/// "any-shape" nature.
pub fn resolve(value: &Value, arr: &[Value]) -> Value {
    resolve_depth(value, arr, 0)
}

fn resolve_depth(value: &Value, arr: &[Value], depth: u32) -> Value {
    if depth >= MAX_DEPTH {
        return value.clone();
    }

    match value {
        Value::String(s) => match parse_index(s, arr.len()) {
            Some(i) => resolve_depth(&arr[i], arr, depth + 1),
            None => value.clone(),
        },
        Value::Object(map) => {
            let resolved = map
                .iter()
                .map(|(k, v)| (k.clone(), resolve_depth(v, arr, depth + 1)))
                .collect();
            Value::Object(resolved)
        }
        Value::Array(items) => {
            let resolved = items
                .iter()
                .map(|v| resolve_depth(v, arr, depth + 1))
                .collect();
            Value::Array(resolved)
        }
        other => other.clone(),
    }
}

/// Parse `s` as a reference index: all-digit, and within bounds of `len`.
fn parse_index(s: &str, len: usize) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let i: usize = s.parse().ok()?;
    if i < len {
        Some(i)
    } else {
        None
    }
}

/// Locate the distinguished `runData` object: the first object in `arr`
/// containing at least one of the well-known node-name keys, read the
/// pointer stored under `name`, resolve it, and descend
/// `[0].data.main[0][0].json` to return that node's output JSON.
///
/// Returns `None` if no such path exists — this is a normal, expected
/// outcome (e.g. the Metadata node was never wired into the workflow),
/// not an error.
pub fn node_output(arr: &[Value], name: &str) -> Option<Value> {
    let run_data = find_run_data(arr)?;
    let node_ref = run_data.get(name)?;
    let resolved = resolve(node_ref, arr);
    descend(&resolved, &["0", "data", "main", "0", "0", "json"])
}

/// As [`node_output`] but descends into `binary[binary_key]` instead of
/// `json`, for the webhook node's image descriptor.
pub fn node_binary(arr: &[Value], name: &str, binary_key: &str) -> Option<Value> {
    let run_data = find_run_data(arr)?;
    let node_ref = run_data.get(name)?;
    let resolved = resolve(node_ref, arr);
    let mut path: Vec<&str> = vec!["0", "data", "main", "0", "0", "binary"];
    path.push(binary_key);
    descend(&resolved, &path)
}

fn find_run_data(arr: &[Value]) -> Option<&serde_json::Map<String, Value>> {
    const MARKERS: [&str; 3] = ["YOLO Inference", "Webhook", "Metadata"];
    arr.iter().find_map(|v| {
        let obj = v.as_object()?;
        if MARKERS.iter().any(|m| obj.contains_key(*m)) {
            Some(obj)
        } else {
            None
        }
    })
}

/// Walk a value through a path of object keys / array indices.
/// Array indices are given as numeric-string path segments (e.g. "0").
fn descend(value: &Value, path: &[&str]) -> Option<Value> {
    let mut current = value.clone();
    for segment in path {
        current = match &current {
            Value::Object(map) => map.get(*segment)?.clone(),
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?.clone()
            }
            _ => return None,
        };
    }
    Some(current)
}
