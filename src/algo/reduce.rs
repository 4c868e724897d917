//! Semantic reductions over candidate tables.
//!
//! The reducer applies the enabled elisions in a fixed order (all-zero,
//! all-null, mostly-zero, clustered timestamps, constants), groups sibling
//! numeric columns into tuples, and caps table width. Every elision appends
//! exactly one annotation line recording what was dropped and why, so no
//! answer-bearing value disappears silently.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::columns::{
    analyze_columns, find_identity_column, order_columns, ColumnInfo, TS_CLUSTER_WINDOW_SECS,
};
use super::flatten::{flatten, fmt, union_columns};
use crate::error::Error;

static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+\.?\d*$").unwrap());

/// Formatted values treated as zero for the mostly-zero threshold.
fn is_zeroish(v: &str) -> bool {
    matches!(v, "0" | "")
}

/// Rendering mode for tables wider than `wide_table_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WideTableFormat {
    /// Per-row `[identity]` sections with `key: value` lines.
    Vertical,
    /// Per-prefix sub-tables, identity columns repeated in each.
    Split,
}

impl WideTableFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "vertical" => Some(Self::Vertical),
            "split" => Some(Self::Split),
            _ => None,
        }
    }
}

/// Toggles and thresholds for the reduction passes.
#[derive(Debug, Clone)]
pub struct Heuristics {
    pub elide_all_zero: bool,
    pub elide_all_null: bool,
    pub elide_timestamps: bool,
    pub elide_constants: bool,
    pub group_tuples: bool,
    pub max_tuple_size: usize,
    /// 0 = unbounded.
    pub max_table_columns: usize,
    /// 0.0 = disabled.
    pub elide_mostly_zero_pct: f64,
    pub pivot_key_value: bool,
    /// 0 = always tabular.
    pub wide_table_threshold: usize,
    pub wide_table_format: WideTableFormat,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            elide_all_zero: true,
            elide_all_null: true,
            elide_timestamps: true,
            elide_constants: true,
            group_tuples: true,
            max_tuple_size: 4,
            max_table_columns: 0,
            elide_mostly_zero_pct: 0.0,
            pivot_key_value: true,
            wide_table_threshold: 0,
            wide_table_format: WideTableFormat::Vertical,
        }
    }
}

/// Recognized option names, in declaration order. `BadConfig` errors list
/// these so a typo is self-explaining.
pub const VALID_OPTIONS: [&str; 11] = [
    "elide_all_zero",
    "elide_all_null",
    "elide_timestamps",
    "elide_constants",
    "group_tuples",
    "max_tuple_size",
    "max_table_columns",
    "elide_mostly_zero_pct",
    "pivot_key_value",
    "wide_table_threshold",
    "wide_table_format",
];

impl Heuristics {
    /// Apply named overrides on top of the current values. Unknown option
    /// names and ill-typed values are `BadConfig`.
    pub fn apply(&mut self, options: &Map<String, Value>) -> Result<(), Error> {
        for (key, val) in options {
            match key.as_str() {
                "elide_all_zero" => self.elide_all_zero = as_bool(key, val)?,
                "elide_all_null" => self.elide_all_null = as_bool(key, val)?,
                "elide_timestamps" => self.elide_timestamps = as_bool(key, val)?,
                "elide_constants" => self.elide_constants = as_bool(key, val)?,
                "group_tuples" => self.group_tuples = as_bool(key, val)?,
                "pivot_key_value" => self.pivot_key_value = as_bool(key, val)?,
                "max_tuple_size" => self.max_tuple_size = as_usize(key, val)?,
                "max_table_columns" => self.max_table_columns = as_usize(key, val)?,
                "wide_table_threshold" => self.wide_table_threshold = as_usize(key, val)?,
                "elide_mostly_zero_pct" => {
                    self.elide_mostly_zero_pct = val.as_f64().ok_or_else(|| bad_type(key, "a number"))?
                }
                "wide_table_format" => {
                    let s = val.as_str().ok_or_else(|| bad_type(key, "a string"))?;
                    self.wide_table_format = WideTableFormat::from_str(s).ok_or_else(|| {
                        Error::BadConfig(format!(
                            "wide_table_format must be \"vertical\" or \"split\", got {s:?}"
                        ))
                    })?;
                }
                unknown => {
                    return Err(Error::BadConfig(format!(
                        "unknown heuristic {unknown:?}. Valid heuristic names are: {}",
                        VALID_OPTIONS.join(", ")
                    )));
                }
            }
        }
        Ok(())
    }

    /// Defaults plus the given overrides.
    pub fn from_options(options: &Map<String, Value>) -> Result<Self, Error> {
        let mut h = Self::default();
        h.apply(options)?;
        Ok(h)
    }
}

fn as_bool(key: &str, val: &Value) -> Result<bool, Error> {
    val.as_bool().ok_or_else(|| bad_type(key, "a boolean"))
}

fn as_usize(key: &str, val: &Value) -> Result<usize, Error> {
    val.as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| bad_type(key, "a non-negative integer"))
}

fn bad_type(key: &str, expected: &str) -> Error {
    Error::BadConfig(format!("heuristic {key:?} expects {expected}"))
}

/// One rendered column: its header plus the source columns it covers
/// (a single column, or the members of a tuple group).
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub header: String,
    pub sources: Vec<String>,
}

/// A reduced table ready for encoding.
#[derive(Debug, Clone)]
pub struct CleanTable {
    pub annotations: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub columns: Vec<ColumnSpec>,
}

/// Analyze and clean a homogeneous array of objects.
pub fn preprocess_table(arr: &[Value], heuristics: &Heuristics) -> CleanTable {
    let flats: Vec<Map<String, Value>> = arr
        .iter()
        .map(|item| match item {
            Value::Object(obj) => flatten(obj),
            _ => Map::new(),
        })
        .collect();

    let cols = order_columns(union_columns(arr));
    let info = analyze_columns(&flats, &cols);

    let mut annotations: Vec<String> = Vec::new();
    let mut elided: HashSet<String> = HashSet::new();

    // 1) all-zero
    if heuristics.elide_all_zero {
        let zc: Vec<&String> = cols
            .iter()
            .filter(|c| info[*c].all_zero && !info[*c].all_null)
            .collect();
        if !zc.is_empty() {
            annotations.push(format!("  elided all_zero: {}", join(&zc)));
            elided.extend(zc.iter().map(|c| (*c).clone()));
        }
    }

    // 2) all-null
    if heuristics.elide_all_null {
        let nc: Vec<&String> = cols
            .iter()
            .filter(|c| info[*c].all_null && !elided.contains(*c))
            .collect();
        if !nc.is_empty() {
            annotations.push(format!("  elided all_null: {}", join(&nc)));
            elided.extend(nc.iter().map(|c| (*c).clone()));
        }
    }

    // 3) mostly-zero, labeled with the identity column when one exists
    if heuristics.elide_mostly_zero_pct > 0.0 {
        let id_col = find_identity_column(&cols, &flats);
        for c in &cols {
            let ci = &info[c];
            if elided.contains(c) || ci.all_zero || ci.all_null || ci.fmted.is_empty() {
                continue;
            }
            let n_zero = ci.fmted.iter().filter(|v| is_zeroish(v)).count();
            if (n_zero as f64 / ci.fmted.len() as f64) < heuristics.elide_mostly_zero_pct {
                continue;
            }
            let outliers: Vec<String> = ci
                .fmted
                .iter()
                .enumerate()
                .filter(|(_, v)| !is_zeroish(v))
                .map(|(i, v)| {
                    let label = id_col
                        .as_ref()
                        .map(|id| fmt(flats[i].get(id).unwrap_or(&Value::Null)))
                        .unwrap_or_else(|| i.to_string());
                    format!("{label}={v}")
                })
                .collect();
            if outliers.is_empty() {
                annotations.push(format!("  elided mostly_zero: {c}"));
            } else {
                annotations.push(format!(
                    "  elided mostly_zero: {c} (non-zero: {})",
                    outliers.join(", ")
                ));
            }
            elided.insert(c.clone());
        }
    }

    // 4) clustered timestamps; a constant timestamp is annotated as a constant
    if heuristics.elide_timestamps {
        for c in &cols {
            let ci = &info[c];
            if elided.contains(c) || !ci.ts_clustered {
                continue;
            }
            if ci.constant {
                annotations.push(format!(
                    "  elided constant {c}: {}",
                    ci.const_val.as_deref().unwrap_or_default()
                ));
            } else {
                let center = ci.ts_center.as_deref().unwrap_or_default();
                annotations.push(format!(
                    "  elided timestamp_cluster {c}: ~{center} (within {TS_CLUSTER_WINDOW_SECS}s)"
                ));
            }
            elided.insert(c.clone());
        }
    }

    // 5) remaining constants
    if heuristics.elide_constants {
        for c in &cols {
            let ci = &info[c];
            if !elided.contains(c) && ci.constant && !ci.all_zero && !ci.all_null {
                annotations.push(format!(
                    "  elided constant {c}: {}",
                    ci.const_val.as_deref().unwrap_or_default()
                ));
                elided.insert(c.clone());
            }
        }
    }

    // 6) tuple grouping over the survivors
    let remaining: Vec<String> = cols.iter().filter(|c| !elided.contains(*c)).cloned().collect();
    let tuples = if heuristics.group_tuples {
        detect_numeric_tuples(&remaining, &info)
    } else {
        Vec::new()
    };

    let mut tuple_specs: Vec<ColumnSpec> = Vec::new();
    let mut tuple_members: HashSet<String> = HashSet::new();
    for (prefix, members) in tuples {
        if members.len() >= 3 && members.len() <= heuristics.max_tuple_size {
            let leaves: Vec<&str> = members
                .iter()
                .map(|m| m.rsplit_once('.').map(|(_, leaf)| leaf).unwrap_or(m))
                .collect();
            tuple_members.extend(members.iter().cloned());
            tuple_specs.push(ColumnSpec {
                header: format!("{prefix}({})", leaves.join(",")),
                sources: members,
            });
        }
    }

    // 7) final column list, tuple headers at their first member's position
    let mut columns: Vec<ColumnSpec> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for c in &cols {
        if elided.contains(c) || seen.contains(c) {
            continue;
        }
        if tuple_members.contains(c) {
            if let Some(spec) = tuple_specs.iter().find(|s| s.sources.contains(c)) {
                if !seen.contains(&spec.header) {
                    seen.insert(spec.header.clone());
                    seen.extend(spec.sources.iter().cloned());
                    columns.push(spec.clone());
                }
            }
        } else {
            seen.insert(c.clone());
            columns.push(ColumnSpec {
                header: c.clone(),
                sources: vec![c.clone()],
            });
        }
    }

    // 8) width cap; identity columns are front-loaded and survive
    if heuristics.max_table_columns > 0 && columns.len() > heuristics.max_table_columns {
        let overflow: Vec<String> = columns[heuristics.max_table_columns..]
            .iter()
            .map(|s| s.header.clone())
            .collect();
        annotations.push(format!(
            "  elided overflow ({} columns exceed limit): {}",
            overflow.len(),
            overflow.join(", ")
        ));
        columns.truncate(heuristics.max_table_columns);
    }

    // 9) cleaned rows keyed by final headers
    let rows: Vec<Map<String, Value>> = flats
        .iter()
        .map(|fl| {
            let mut row = Map::new();
            for spec in &columns {
                let cell = if spec.sources.len() == 1 {
                    match fl.get(&spec.sources[0]) {
                        None | Some(Value::Null) => Value::String(String::new()),
                        Some(v) => v.clone(),
                    }
                } else {
                    let joined: Vec<String> = spec
                        .sources
                        .iter()
                        .map(|s| fmt(fl.get(s).unwrap_or(&Value::Null)))
                        .collect();
                    Value::String(joined.join(","))
                };
                row.insert(spec.header.clone(), cell);
            }
            row
        })
        .collect();

    CleanTable {
        annotations,
        rows,
        columns,
    }
}

fn join(cols: &[&String]) -> String {
    cols.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ")
}

/// Group surviving columns by shared dotted prefix where every member holds
/// only numeric or empty formatted values. Returns (prefix, members) in
/// first-seen order; size filtering happens at the call site.
pub fn detect_numeric_tuples(
    cols: &[String],
    info: &std::collections::HashMap<String, ColumnInfo>,
) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for col in cols {
        if let Some((prefix, _)) = col.rsplit_once('.') {
            match groups.iter_mut().find(|(p, _)| p == prefix) {
                Some((_, members)) => members.push(col.clone()),
                None => groups.push((prefix.to_string(), vec![col.clone()])),
            }
        }
    }

    groups
        .into_iter()
        .filter(|(_, members)| {
            members.len() >= 3
                && members.iter().all(|m| {
                    info[m]
                        .fmted
                        .iter()
                        .all(|v| v.is_empty() || NUMERIC_RE.is_match(v))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_rows() -> Vec<Value> {
        vec![
            json!({"name": "a", "zero_col": 0, "null_col": null, "const_col": "same",
                   "ts": "2024-01-01T00:00:00Z", "vec": {"x": 1, "y": 2, "z": 3}}),
            json!({"name": "b", "zero_col": 0, "null_col": null, "const_col": "same",
                   "ts": "2024-01-01T00:00:05Z", "vec": {"x": 4, "y": 5, "z": 6}}),
            json!({"name": "c", "zero_col": 0, "null_col": null, "const_col": "same",
                   "ts": "2024-01-01T00:00:10Z", "vec": {"x": 7, "y": 8, "z": 9}}),
        ]
    }

    fn headers(table: &CleanTable) -> Vec<&str> {
        table.columns.iter().map(|c| c.header.as_str()).collect()
    }

    #[test]
    fn defaults() {
        let h = Heuristics::default();
        assert!(h.elide_all_zero && h.elide_all_null && h.elide_timestamps);
        assert!(h.elide_constants && h.group_tuples && h.pivot_key_value);
        assert_eq!(h.max_tuple_size, 4);
        assert_eq!(h.max_table_columns, 0);
        assert_eq!(h.elide_mostly_zero_pct, 0.0);
        assert_eq!(h.wide_table_threshold, 0);
        assert_eq!(h.wide_table_format, WideTableFormat::Vertical);
    }

    #[test]
    fn from_options_overrides() {
        let opts = json!({"elide_timestamps": false, "group_tuples": false});
        let h = Heuristics::from_options(opts.as_object().unwrap()).unwrap();
        assert!(!h.elide_timestamps);
        assert!(!h.group_tuples);
        assert!(h.elide_all_zero);
    }

    #[test]
    fn unknown_option_lists_valid_names() {
        let opts = json!({"elide_timestaps": false});
        let err = Heuristics::from_options(opts.as_object().unwrap()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Valid heuristic names are"), "{msg}");
        assert!(msg.contains("elide_timestamps"), "{msg}");
    }

    #[test]
    fn ill_typed_option_rejected() {
        let opts = json!({"max_tuple_size": "four"});
        assert!(Heuristics::from_options(opts.as_object().unwrap()).is_err());
    }

    #[test]
    fn elides_zero_null_constant_timestamp() {
        let table = preprocess_table(&sample_rows(), &Heuristics::default());
        let joined = table.annotations.join("\n");
        assert!(joined.contains("all_zero: zero_col"));
        assert!(joined.contains("all_null: null_col"));
        assert!(joined.contains("constant const_col: same"));
        assert!(joined.contains("timestamp_cluster ts: ~2024-01-01T00:00:05Z"));
        let hs = headers(&table);
        assert!(!hs.contains(&"zero_col"));
        assert!(!hs.contains(&"null_col"));
        assert!(!hs.contains(&"const_col"));
        assert!(!hs.contains(&"ts"));
    }

    #[test]
    fn every_annotation_is_single_elision_line() {
        let table = preprocess_table(&sample_rows(), &Heuristics::default());
        assert_eq!(table.annotations.len(), 4);
        for a in &table.annotations {
            assert!(a.starts_with("  elided "), "{a}");
            assert!(!a.contains('\n'));
        }
    }

    #[test]
    fn disabled_zero_elision_keeps_column() {
        let opts = json!({"elide_all_zero": false});
        let h = Heuristics::from_options(opts.as_object().unwrap()).unwrap();
        let table = preprocess_table(&sample_rows(), &h);
        assert!(headers(&table).contains(&"zero_col"));
        assert!(!table.annotations.iter().any(|a| a.contains("all_zero")));
    }

    #[test]
    fn all_disabled_preserves_everything() {
        let opts = json!({
            "elide_all_zero": false, "elide_all_null": false,
            "elide_timestamps": false, "elide_constants": false,
            "group_tuples": false
        });
        let h = Heuristics::from_options(opts.as_object().unwrap()).unwrap();
        let table = preprocess_table(&sample_rows(), &h);
        assert!(table.annotations.is_empty());
        let hs = headers(&table);
        for col in ["zero_col", "null_col", "const_col", "ts", "vec.x", "vec.y", "vec.z"] {
            assert!(hs.contains(&col), "missing {col}");
        }
    }

    #[test]
    fn groups_numeric_tuple() {
        let table = preprocess_table(&sample_rows(), &Heuristics::default());
        let hs = headers(&table);
        assert!(hs.contains(&"vec(x,y,z)"), "{hs:?}");
        assert!(!hs.contains(&"vec.x"));
        assert_eq!(table.rows[0]["vec(x,y,z)"], json!("1,2,3"));
        assert_eq!(table.rows[2]["vec(x,y,z)"], json!("7,8,9"));
    }

    #[test]
    fn oversized_tuple_not_grouped() {
        let rows: Vec<Value> = (0..3)
            .map(|i| {
                json!({"name": format!("r{i}"),
                       "memory": {"a": i, "b": i, "c": i, "d": i, "e": i, "f": i}})
            })
            .collect();
        let table = preprocess_table(&rows, &Heuristics::default());
        let hs = headers(&table);
        assert!(!hs.iter().any(|h| h.starts_with("memory(")));
        assert!(hs.contains(&"memory.a"));
        assert!(hs.contains(&"memory.f"));
    }

    #[test]
    fn larger_max_tuple_size_groups_wide_tuple() {
        let rows: Vec<Value> = (0..3)
            .map(|i| {
                json!({"name": format!("r{i}"),
                       "memory": {"a": i, "b": i, "c": i, "d": i, "e": i, "f": i}})
            })
            .collect();
        let opts = json!({"max_tuple_size": 6, "elide_constants": false});
        let h = Heuristics::from_options(opts.as_object().unwrap()).unwrap();
        let table = preprocess_table(&rows, &h);
        assert!(headers(&table).iter().any(|h| h.starts_with("memory(")));
    }

    #[test]
    fn non_numeric_prefix_group_not_grouped() {
        let rows = vec![
            json!({"name": "a", "tag": {"x": "red", "y": "blue", "z": "green"}}),
            json!({"name": "b", "tag": {"x": "cyan", "y": "teal", "z": "pink"}}),
        ];
        let table = preprocess_table(&rows, &Heuristics::default());
        assert!(!headers(&table).iter().any(|h| h.starts_with("tag(")));
    }

    #[test]
    fn column_cap_truncates_from_the_right() {
        let rows: Vec<Value> = ["pod-a", "pod-b", "pod-c"]
            .iter()
            .map(|name| {
                let mut obj = serde_json::Map::new();
                obj.insert("podRef.name".into(), json!(name));
                obj.insert("podRef.namespace".into(), json!("default"));
                for i in 0..22 {
                    obj.insert(format!("col{i}"), json!(i + 1));
                }
                Value::Object(obj)
            })
            .collect();
        let opts = json!({
            "max_table_columns": 4, "elide_all_zero": false, "elide_all_null": false,
            "elide_timestamps": false, "elide_constants": false, "group_tuples": false
        });
        let h = Heuristics::from_options(opts.as_object().unwrap()).unwrap();
        let table = preprocess_table(&rows, &h);
        assert_eq!(table.columns.len(), 4);
        let hs = headers(&table);
        assert!(hs.contains(&"podRef.name"));
        assert!(hs.contains(&"podRef.namespace"));
        let overflow: Vec<&String> = table
            .annotations
            .iter()
            .filter(|a| a.contains("overflow"))
            .collect();
        assert_eq!(overflow.len(), 1);
        assert!(overflow[0].contains("columns exceed limit"));
        for row in &table.rows {
            assert!(row.len() <= 4);
        }
    }

    #[test]
    fn zero_cap_keeps_all_columns() {
        let rows = sample_rows();
        let opts = json!({
            "elide_all_zero": false, "elide_all_null": false,
            "elide_timestamps": false, "elide_constants": false, "group_tuples": false
        });
        let h = Heuristics::from_options(opts.as_object().unwrap()).unwrap();
        let table = preprocess_table(&rows, &h);
        assert_eq!(table.columns.len(), 8);
    }

    #[test]
    fn mostly_zero_outliers_labeled_by_identity() {
        let rows = vec![
            json!({"name": "a", "data_col": 100, "mostly_zero_col": 0}),
            json!({"name": "b", "data_col": 200, "mostly_zero_col": 0}),
            json!({"name": "c", "data_col": 300, "mostly_zero_col": 0}),
            json!({"name": "d", "data_col": 400, "mostly_zero_col": 42}),
            json!({"name": "e", "data_col": 500, "mostly_zero_col": 0}),
        ];
        let opts = json!({"elide_mostly_zero_pct": 0.8});
        let h = Heuristics::from_options(opts.as_object().unwrap()).unwrap();
        let table = preprocess_table(&rows, &h);
        let mz: Vec<&String> = table
            .annotations
            .iter()
            .filter(|a| a.contains("mostly_zero: mostly_zero_col"))
            .collect();
        assert_eq!(mz.len(), 1);
        assert!(mz[0].contains("non-zero: d=42"), "{}", mz[0]);
        assert!(!headers(&table).contains(&"mostly_zero_col"));
    }

    #[test]
    fn mostly_zero_below_threshold_kept() {
        let rows = vec![
            json!({"name": "a", "mixed_col": 10, "pad": 1}),
            json!({"name": "b", "mixed_col": 0, "pad": 2}),
            json!({"name": "c", "mixed_col": 20, "pad": 3}),
            json!({"name": "d", "mixed_col": 0, "pad": 4}),
            json!({"name": "e", "mixed_col": 30, "pad": 5}),
        ];
        let opts = json!({"elide_mostly_zero_pct": 0.8});
        let h = Heuristics::from_options(opts.as_object().unwrap()).unwrap();
        let table = preprocess_table(&rows, &h);
        assert!(headers(&table).contains(&"mixed_col"));
    }

    #[test]
    fn mostly_zero_disabled_by_default() {
        let rows = vec![
            json!({"name": "a", "mz": 0, "pad": 1}),
            json!({"name": "b", "mz": 42, "pad": 2}),
            json!({"name": "c", "mz": 0, "pad": 3}),
        ];
        let table = preprocess_table(&rows, &Heuristics::default());
        assert!(!table.annotations.iter().any(|a| a.contains("mostly_zero")));
    }

    #[test]
    fn identity_columns_lead_row_order() {
        let rows = vec![
            json!({"cpu": 1, "name": "a", "mem": 2}),
            json!({"cpu": 3, "name": "b", "mem": 4}),
        ];
        let table = preprocess_table(&rows, &Heuristics::default());
        assert_eq!(headers(&table)[0], "name");
    }

    #[test]
    fn missing_values_render_empty() {
        let rows = vec![
            json!({"name": "a", "opt": 1, "other": "x"}),
            json!({"name": "b", "other": "y"}),
        ];
        let opts = json!({"elide_constants": false});
        let h = Heuristics::from_options(opts.as_object().unwrap()).unwrap();
        let table = preprocess_table(&rows, &h);
        assert_eq!(table.rows[1]["opt"], json!(""));
    }
}
