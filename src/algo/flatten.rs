//! Structural classification of parsed payloads.
//!
//! Everything downstream of the parsers works on `serde_json::Value` trees
//! (built with `preserve_order`, so object keys keep first-seen order) and on
//! flat records: ordered maps from dotted paths to non-object values.

use serde_json::{Map, Value};

/// Minimum fraction of union columns that must appear in every row for an
/// array of objects to be treated as one table.
pub const HOMOGENEITY_THRESHOLD: f64 = 0.6;

/// Name the tag of a value: `null`, `bool`, `number`, `string`, `array`,
/// or `object`.
pub fn classify(val: &Value) -> &'static str {
    match val {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Format a scalar for table cells and annotations. Null becomes the empty
/// string, booleans lowercase, and floats with an integral value lose the
/// trailing `.0` so `3.0` and `3` render identically.
pub fn fmt(val: &Value) -> String {
    match val {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if n.as_i64().is_none()
                    && n.as_u64().is_none()
                    && f.fract() == 0.0
                    && f.is_finite()
                    && f.abs() < 9.0e15
                {
                    return format!("{}", f as i64);
                }
            }
            n.to_string()
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Flatten a nested object into dotted-path keys. Arrays are kept whole at
/// their location; the result never contains an object value.
pub fn flatten(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(obj, "", &mut out);
    out
}

fn flatten_into(obj: &Map<String, Value>, prefix: &str, out: &mut Map<String, Value>) {
    for (k, v) in obj {
        let key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        match v {
            Value::Object(inner) => flatten_into(inner, &key, out),
            other => {
                out.insert(key, other.clone());
            }
        }
    }
}

/// All scalar (non-array) dotted columns across the items, in first-seen order.
pub fn union_columns(arr: &[Value]) -> Vec<String> {
    let mut keys: Map<String, Value> = Map::new();
    for item in arr {
        if let Value::Object(obj) = item {
            for (k, v) in flatten(obj) {
                if !v.is_array() && !keys.contains_key(&k) {
                    keys.insert(k, Value::Bool(true));
                }
            }
        }
    }
    keys.into_iter().map(|(k, _)| k).collect()
}

/// True when the array is a uniform list of objects suitable for tabular
/// rendering: at least two objects, at least two scalar columns in the
/// union, and the shared columns cover the homogeneity threshold.
pub fn is_homogeneous_array(arr: &[Value]) -> bool {
    is_homogeneous_with(arr, HOMOGENEITY_THRESHOLD)
}

/// `is_homogeneous_array` with an explicit key-overlap threshold.
pub fn is_homogeneous_with(arr: &[Value], threshold: f64) -> bool {
    if arr.len() < 2 || !arr.iter().all(Value::is_object) {
        return false;
    }

    let mut union: Vec<String> = Vec::new();
    let mut per_item: Vec<Vec<String>> = Vec::with_capacity(arr.len());
    for item in arr {
        let Value::Object(obj) = item else { unreachable!() };
        let keys: Vec<String> = flatten(obj)
            .into_iter()
            .filter(|(_, v)| !v.is_array())
            .map(|(k, _)| k)
            .collect();
        for k in &keys {
            if !union.contains(k) {
                union.push(k.clone());
            }
        }
        per_item.push(keys);
    }
    if union.len() < 2 {
        return false;
    }

    let common = union
        .iter()
        .filter(|k| per_item.iter().all(|keys| keys.contains(k)))
        .count();
    common as f64 >= union.len() as f64 * threshold
}

/// True when every element is an object with exactly the keys `Key` and
/// `Value`, and `Key` is a string. Such arrays pivot into parent columns.
pub fn is_kv_array(arr: &[Value]) -> bool {
    if arr.is_empty() {
        return false;
    }
    arr.iter().all(|item| match item {
        Value::Object(obj) => {
            obj.len() == 2
                && matches!(obj.get("Key"), Some(Value::String(_)))
                && obj.contains_key("Value")
        }
        _ => false,
    })
}
