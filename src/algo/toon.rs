//! Compact tabular text encoding of cleaned values.
//!
//! Uniform arrays of flat objects render as a `[n]{col,col}:` header plus one
//! comma-joined row per line; objects render as `key: value` lines with
//! nesting by two-space indent. The encoding is deterministic, keeps every
//! non-null scalar verbatim, and always names its columns.

use serde_json::{Map, Value};

use super::flatten::fmt;

const INDENT: &str = "  ";

/// Quote a cell only when the raw text would be ambiguous in a
/// comma-joined row or a `key: value` line.
fn cell(raw: &str) -> String {
    let needs_quoting = raw.contains(',')
        || raw.contains('"')
        || raw.contains('\n')
        || raw.contains(':')
        || raw != raw.trim();
    if needs_quoting {
        serde_json::to_string(raw).unwrap_or_else(|_| raw.to_string())
    } else {
        raw.to_string()
    }
}

/// True when every element is an object over exactly the same scalar keys.
fn is_uniform_rows(arr: &[Value]) -> bool {
    let Some(Value::Object(first)) = arr.first() else {
        return false;
    };
    let keys: Vec<&String> = first.keys().collect();
    if keys.is_empty() {
        return false;
    }
    arr.iter().all(|item| match item {
        Value::Object(obj) => {
            obj.len() == keys.len()
                && obj.keys().zip(&keys).all(|(a, b)| a == *b)
                && obj.values().all(|v| !v.is_array() && !v.is_object())
        }
        _ => false,
    })
}

fn push_rows(out: &mut String, label: &str, rows: &[Value], headers: &[String], indent: &str) {
    out.push_str(indent);
    out.push_str(label);
    out.push('[');
    out.push_str(&rows.len().to_string());
    out.push_str("]{");
    out.push_str(
        &headers
            .iter()
            .map(|h| cell(h))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push_str("}:\n");
    for row in rows {
        let Value::Object(obj) = row else { continue };
        let line: Vec<String> = headers
            .iter()
            .map(|h| cell(&obj.get(h).map(fmt).unwrap_or_default()))
            .collect();
        out.push_str(indent);
        out.push_str(INDENT);
        out.push_str(&line.join(","));
        out.push('\n');
    }
}

fn push_value(out: &mut String, key: &str, value: &Value, indent: &str) {
    match value {
        Value::Object(obj) => {
            out.push_str(indent);
            out.push_str(&cell(key));
            out.push_str(":\n");
            let deeper = format!("{indent}{INDENT}");
            for (k, v) in obj {
                push_value(out, k, v, &deeper);
            }
        }
        Value::Array(arr) if is_uniform_rows(arr) => {
            let headers: Vec<String> = arr[0].as_object().unwrap().keys().cloned().collect();
            push_rows(out, &cell(key), arr, &headers, indent);
        }
        Value::Array(arr) if arr.iter().all(|v| !v.is_array() && !v.is_object()) => {
            out.push_str(indent);
            out.push_str(&cell(key));
            out.push('[');
            out.push_str(&arr.len().to_string());
            out.push_str("]: ");
            out.push_str(
                &arr.iter()
                    .map(|v| cell(&fmt(v)))
                    .collect::<Vec<_>>()
                    .join(","),
            );
            out.push('\n');
        }
        Value::Array(arr) => {
            // Heterogeneous array: one dash entry per element
            out.push_str(indent);
            out.push_str(&cell(key));
            out.push_str("[");
            out.push_str(&arr.len().to_string());
            out.push_str("]:\n");
            let deeper = format!("{indent}{INDENT}");
            for v in arr {
                match v {
                    Value::Object(_) | Value::Array(_) => {
                        out.push_str(&deeper);
                        out.push_str("- ");
                        out.push_str(&serde_json::to_string(v).unwrap_or_default());
                        out.push('\n');
                    }
                    scalar => {
                        out.push_str(&deeper);
                        out.push_str("- ");
                        out.push_str(&cell(&fmt(scalar)));
                        out.push('\n');
                    }
                }
            }
        }
        scalar => {
            out.push_str(indent);
            out.push_str(&cell(key));
            out.push_str(": ");
            out.push_str(&cell(&fmt(scalar)));
            out.push('\n');
        }
    }
}

/// Encode rows that share an explicit header list (reduced tables).
pub fn encode_rows(rows: &[Map<String, Value>], headers: &[String]) -> String {
    let values: Vec<Value> = rows.iter().map(|r| Value::Object(r.clone())).collect();
    let mut out = String::new();
    push_rows(&mut out, "", &values, headers, "");
    out.trim_end().to_string()
}

/// Encode a single flat object as `key: value` lines.
pub fn encode_object(obj: &Map<String, Value>) -> String {
    let mut out = String::new();
    for (k, v) in obj {
        push_value(&mut out, k, v, "");
    }
    out.trim_end().to_string()
}

/// Encode an arbitrary value without any semantic preprocessing.
pub fn encode(value: &Value) -> String {
    match value {
        Value::Object(obj) => encode_object(obj),
        Value::Array(arr) if is_uniform_rows(arr) => {
            let headers: Vec<String> = arr[0].as_object().unwrap().keys().cloned().collect();
            let mut out = String::new();
            push_rows(&mut out, "", arr, &headers, "");
            out.trim_end().to_string()
        }
        Value::Array(_) => {
            let mut out = String::new();
            push_value(&mut out, "items", value, "");
            out.trim_end().to_string()
        }
        scalar => fmt(scalar),
    }
}
