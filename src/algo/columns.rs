//! Per-column characterization of candidate tables.
//!
//! For every column of a homogeneous array we keep the formatted value of
//! each row, the distinct-value set, and the classifications the reducer
//! keys its elisions on: all-zero, all-null, constant, and clustered
//! ISO-8601 timestamps.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime};
use regex::Regex;
use serde_json::{Map, Value};

use super::flatten::fmt;

/// Timestamps whose span is at most this many seconds collapse into one
/// cluster annotation.
pub const TS_CLUSTER_WINDOW_SECS: i64 = 60;

/// Final path segments that mark a column as identity-like; these columns
/// are promoted to the front of the column order before reduction.
pub const ID_SEGMENTS: [&str; 7] = ["name", "id", "ref", "uid", "namespace", "label", "nodename"];

/// Keyword preference order for picking the single row-label column.
const ID_KEYWORDS: [&str; 3] = ["name", "id", "uid"];

static ISO_TS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").unwrap());

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Formatted value per row, in row order.
    pub fmted: Vec<String>,
    /// Distinct formatted values.
    pub unique: BTreeSet<String>,
    /// Every formatted value is zero-equivalent (`0`, `0.0`, or empty).
    pub all_zero: bool,
    /// Every formatted value is empty.
    pub all_null: bool,
    /// Exactly one distinct formatted value.
    pub constant: bool,
    /// The single value when `constant`.
    pub const_val: Option<String>,
    /// Every non-null value matches an ISO-8601 timestamp.
    pub is_timestamp: bool,
    /// `is_timestamp` and the span is within the cluster window.
    pub ts_clustered: bool,
    /// Original string of the sorted-median timestamp when clustered.
    pub ts_center: Option<String>,
}

/// True when the string starts with `YYYY-MM-DDTHH:MM:SS`; any trailing
/// fraction or offset is allowed.
pub fn is_iso_timestamp(s: &str) -> bool {
    ISO_TS_RE.is_match(s)
}

/// Parse an ISO-8601 timestamp to epoch milliseconds. Accepts an explicit
/// offset, a trailing `Z`, or a bare naive timestamp (read as UTC).
pub fn parse_timestamp(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt_str in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt_str) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    None
}

/// Characterize one column over flattened rows.
fn analyze_column(rows: &[Map<String, Value>], col: &str) -> ColumnInfo {
    let raw: Vec<Option<&Value>> = rows.iter().map(|r| r.get(col)).collect();
    let fmted: Vec<String> = raw
        .iter()
        .map(|v| v.map(fmt).unwrap_or_default())
        .collect();
    let unique: BTreeSet<String> = fmted.iter().cloned().collect();

    let all_null = unique.iter().all(|v| v.is_empty());
    let all_zero = unique.iter().all(|v| matches!(v.as_str(), "0" | "0.0" | ""));
    let constant = unique.len() == 1;
    let const_val = constant.then(|| fmted[0].clone());

    let non_null: Vec<&str> = raw
        .iter()
        .filter_map(|v| match v {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        })
        .collect();
    let non_null_count = raw.iter().filter(|v| !matches!(v, None | Some(Value::Null))).count();
    // Non-string non-null values can never be timestamps
    let is_timestamp = non_null.len() == non_null_count && non_null.iter().all(|s| is_iso_timestamp(s));

    let mut ts_clustered = false;
    let mut ts_center = None;
    if is_timestamp {
        let mut parsed: Vec<(i64, &str)> = non_null
            .iter()
            .filter_map(|s| parse_timestamp(s).map(|t| (t, *s)))
            .collect();
        if !parsed.is_empty() {
            parsed.sort();
            let span_ms = parsed.last().unwrap().0 - parsed[0].0;
            if span_ms <= TS_CLUSTER_WINDOW_SECS * 1000 {
                ts_clustered = true;
                ts_center = Some(parsed[parsed.len() / 2].1.to_string());
            }
        }
    }

    ColumnInfo {
        fmted,
        unique,
        all_zero,
        all_null,
        constant,
        const_val,
        is_timestamp,
        ts_clustered,
        ts_center,
    }
}

/// Characterize every column of a table.
pub fn analyze_columns(rows: &[Map<String, Value>], cols: &[String]) -> HashMap<String, ColumnInfo> {
    cols.iter()
        .map(|c| (c.clone(), analyze_column(rows, c)))
        .collect()
}

fn last_segment(col: &str) -> &str {
    col.rsplit('.').next().unwrap_or(col)
}

/// True when the column's final path segment is identity-like.
pub fn is_identity_segment(col: &str) -> bool {
    let last = last_segment(col).to_ascii_lowercase();
    ID_SEGMENTS.contains(&last.as_str())
}

/// Move identity-like columns to the front, keeping relative order within
/// each group.
pub fn order_columns(cols: Vec<String>) -> Vec<String> {
    let (ids, rest): (Vec<String>, Vec<String>) =
        cols.into_iter().partition(|c| is_identity_segment(c));
    ids.into_iter().chain(rest).collect()
}

/// Pick the best column to label rows in annotations and wide-table
/// section headers.
///
/// For each keyword in order (`name`, `id`, `uid`): take the columns whose
/// final segment matches case-insensitively; a single match wins outright,
/// several are tie-broken by the highest count of distinct non-empty
/// values. Falls back to the first column.
pub fn find_identity_column(cols: &[String], rows: &[Map<String, Value>]) -> Option<String> {
    find_identity_keyword(cols, rows).or_else(|| cols.first().cloned())
}

/// `find_identity_column` without the first-column fallback. The vertical
/// renderer numbers rows instead of mislabeling them with an arbitrary
/// column.
pub fn find_identity_keyword(cols: &[String], rows: &[Map<String, Value>]) -> Option<String> {
    for kw in ID_KEYWORDS {
        let matches: Vec<&String> = cols
            .iter()
            .filter(|c| last_segment(c).eq_ignore_ascii_case(kw))
            .collect();
        match matches.len() {
            0 => continue,
            1 => return Some(matches[0].clone()),
            _ => {
                let mut best: Option<(&String, usize)> = None;
                for col in matches {
                    let distinct: BTreeSet<String> = rows
                        .iter()
                        .map(|r| r.get(col.as_str()).map(fmt).unwrap_or_default())
                        .filter(|v| !v.is_empty())
                        .collect();
                    if best.map_or(true, |(_, n)| distinct.len() > n) {
                        best = Some((col, distinct.len()));
                    }
                }
                return best.map(|(c, _)| c.clone());
            }
        }
    }
    None
}
