//! Block rendering of condensed values.
//!
//! A rendered payload is a sequence of blocks joined by blank lines: a
//! `--- <name> (<n> rows) ---` header, the reducer's annotation lines, and a
//! tabular body. Key/value sub-arrays pivot into parent columns, nested
//! object arrays split off into sub-table blocks with parent back-references,
//! and tables wider than the configured threshold switch to the vertical or
//! split layout.

use serde_json::{Map, Value};

use super::columns::{
    find_identity_column, find_identity_keyword, is_identity_segment, order_columns,
};
use super::flatten::{flatten, fmt, is_homogeneous_array, is_kv_array, union_columns};
use super::reduce::{preprocess_table, CleanTable, ColumnSpec, Heuristics, WideTableFormat};
use super::toon;

/// Lift every field that is a key/value array in all rows into
/// `<field>.<Key>` columns on the parent rows, removing the original array.
/// Only runs on the top level of each row object.
pub fn pivot_kv_arrays(arr: &[Value]) -> Vec<Value> {
    if !arr.iter().all(Value::is_object) {
        return arr.to_vec();
    }

    let candidates: Vec<String> = match arr.first() {
        Some(Value::Object(first)) => first
            .keys()
            .filter(|k| {
                arr.iter().all(|item| {
                    matches!(item.get(k.as_str()), Some(Value::Array(sub)) if is_kv_array(sub))
                })
            })
            .cloned()
            .collect(),
        _ => return arr.to_vec(),
    };
    if candidates.is_empty() {
        return arr.to_vec();
    }

    // Union of Key strings per field, in first-seen order across all rows
    let mut key_union: Vec<(String, Vec<String>)> = Vec::new();
    for field in &candidates {
        let mut keys: Vec<String> = Vec::new();
        for item in arr {
            if let Some(Value::Array(sub)) = item.get(field.as_str()) {
                for entry in sub {
                    if let Some(Value::String(k)) = entry.get("Key") {
                        if !keys.contains(k) {
                            keys.push(k.clone());
                        }
                    }
                }
            }
        }
        key_union.push((field.clone(), keys));
    }

    arr.iter()
        .map(|item| {
            let Value::Object(obj) = item else { return item.clone() };
            let mut out = Map::new();
            for (k, v) in obj {
                match key_union.iter().find(|(field, _)| field == k) {
                    Some((field, keys)) => {
                        let Value::Array(sub) = v else { continue };
                        for uk in keys {
                            let val = sub
                                .iter()
                                .rev()
                                .find(|e| e.get("Key").and_then(Value::as_str) == Some(uk))
                                .and_then(|e| e.get("Value"))
                                .cloned()
                                .unwrap_or_else(|| Value::String(String::new()));
                            out.insert(format!("{field}.{uk}"), val);
                        }
                    }
                    None => {
                        out.insert(k.clone(), v.clone());
                    }
                }
            }
            Value::Object(out)
        })
        .collect()
}

/// Render a homogeneous array as table block(s): the parent table plus one
/// block per extracted sub-table.
pub fn render_table(name: &str, arr: &[Value], heuristics: &Heuristics) -> Vec<String> {
    if arr.is_empty() {
        return vec![format!("--- {name} ---\n(empty)")];
    }
    let rows = if heuristics.pivot_key_value {
        pivot_kv_arrays(arr)
    } else {
        arr.to_vec()
    };
    render_table_rows(name, &rows, heuristics)
}

fn render_table_rows(name: &str, rows: &[Value], heuristics: &Heuristics) -> Vec<String> {
    let flats: Vec<Map<String, Value>> = rows
        .iter()
        .map(|item| match item {
            Value::Object(obj) => flatten(obj),
            _ => Map::new(),
        })
        .collect();

    let scalar_cols = order_columns(union_columns(rows));
    let id_col = find_identity_column(&scalar_cols, &flats);

    // Array-valued fields become sub-tables when their elements overlap
    let mut array_fields: Vec<String> = Vec::new();
    for fl in &flats {
        for (k, v) in fl {
            if v.is_array() && !array_fields.contains(k) {
                array_fields.push(k.clone());
            }
        }
    }
    array_fields.sort();

    let mut sub_tables: Vec<(String, Vec<Map<String, Value>>)> = Vec::new();
    for af in &array_fields {
        let mut sub_items: Vec<Map<String, Value>> = Vec::new();
        for fl in &flats {
            let parent_id = id_col
                .as_ref()
                .map(|id| fmt(fl.get(id).unwrap_or(&Value::Null)))
                .unwrap_or_default();
            let Some(Value::Array(sub)) = fl.get(af) else { continue };
            for entry in sub {
                if let Value::Object(sub_obj) = entry {
                    let mut tagged = Map::new();
                    let parent_key = id_col.as_deref().unwrap_or("row");
                    tagged.insert(format!("_parent.{parent_key}"), Value::String(parent_id.clone()));
                    for (k, v) in flatten(sub_obj) {
                        tagged.insert(k, v);
                    }
                    sub_items.push(tagged);
                }
            }
        }
        if sub_items.len() < 2 {
            continue;
        }
        let mut common: Option<Vec<String>> = None;
        for si in &sub_items {
            let keys: Vec<String> = si
                .iter()
                .filter(|(_, v)| !v.is_array())
                .map(|(k, _)| k.clone())
                .collect();
            common = Some(match common {
                None => keys,
                Some(prev) => prev.into_iter().filter(|k| keys.contains(k)).collect(),
            });
        }
        if common.map_or(0, |c| c.len()) >= 2 {
            sub_tables.push((af.clone(), sub_items));
        }
    }

    let clean = preprocess_table(rows, heuristics);

    let header = format!("--- {name} ({} rows) ---", rows.len());
    let mut blocks = Vec::new();

    let wide = heuristics.wide_table_threshold > 0
        && clean.columns.len() > heuristics.wide_table_threshold;
    if wide {
        match heuristics.wide_table_format {
            WideTableFormat::Vertical => {
                let mut parts = vec![header];
                parts.extend(clean.annotations.clone());
                parts.push(render_vertical(&clean, &scalar_cols, &flats));
                blocks.push(parts.join("\n"));
            }
            WideTableFormat::Split => {
                let mut parts = vec![header];
                parts.extend(clean.annotations.clone());
                blocks.push(parts.join("\n"));
                blocks.extend(render_split(name, &clean));
            }
        }
    } else {
        let headers: Vec<String> = clean.columns.iter().map(|c| c.header.clone()).collect();
        let mut parts = vec![header];
        parts.extend(clean.annotations.clone());
        parts.push(toon::encode_rows(&clean.rows, &headers));
        blocks.push(parts.join("\n"));
    }

    for (af, sub_items) in sub_tables {
        let sub_name = format!("{name}.{af}");
        let sub_rows: Vec<Value> = sub_items.into_iter().map(Value::Object).collect();
        let sub_clean = preprocess_table(&sub_rows, heuristics);
        let sub_headers: Vec<String> = sub_clean.columns.iter().map(|c| c.header.clone()).collect();
        let mut parts = vec![format!("--- {sub_name} ({} rows) ---", sub_rows.len())];
        parts.extend(sub_clean.annotations.clone());
        parts.push(toon::encode_rows(&sub_clean.rows, &sub_headers));
        blocks.push(parts.join("\n"));
    }

    blocks
}

/// One `[label]` section per row, then `key: value` lines for every
/// non-label column. Preserves all values; never elides.
fn render_vertical(
    clean: &CleanTable,
    scalar_cols: &[String],
    flats: &[Map<String, Value>],
) -> String {
    let label_col = find_identity_keyword(scalar_cols, flats);
    let mut out: Vec<String> = Vec::new();
    for (i, row) in clean.rows.iter().enumerate() {
        let label = match &label_col {
            Some(col) => fmt(flats[i].get(col.as_str()).unwrap_or(&Value::Null)),
            None => format!("row {i}"),
        };
        out.push(format!("[{label}]"));
        for spec in &clean.columns {
            if Some(&spec.header) == label_col.as_ref() {
                continue;
            }
            let val = row.get(&spec.header).map(fmt).unwrap_or_default();
            out.push(format!("{}: {val}", spec.header));
        }
        out.push(String::new());
    }
    while out.last().is_some_and(String::is_empty) {
        out.pop();
    }
    out.join("\n")
}

/// Partition non-identity columns by first dotted segment; identity columns
/// repeat in every partition. Loose columns and one-member groups land in
/// `_misc`.
fn render_split(name: &str, clean: &CleanTable) -> Vec<String> {
    let (identity, data): (Vec<&ColumnSpec>, Vec<&ColumnSpec>) = clean
        .columns
        .iter()
        .partition(|spec| is_identity_segment(&spec.header));

    let mut groups: Vec<(String, Vec<&ColumnSpec>)> = Vec::new();
    let mut misc: Vec<&ColumnSpec> = Vec::new();
    for spec in data {
        match spec.header.split_once('.') {
            Some((prefix, _)) => match groups.iter_mut().find(|(p, _)| p == prefix) {
                Some((_, members)) => members.push(spec),
                None => groups.push((prefix.to_string(), vec![spec])),
            },
            None => misc.push(spec),
        }
    }
    // One-member groups fold into _misc
    let (real, loose): (Vec<_>, Vec<_>) = groups.into_iter().partition(|(_, m)| m.len() > 1);
    for (_, members) in loose {
        misc.extend(members);
    }

    let mut partitions: Vec<(String, Vec<&ColumnSpec>)> = real;
    if !misc.is_empty() {
        partitions.push(("_misc".to_string(), misc));
    }

    let mut blocks = Vec::new();
    for (prefix, members) in partitions {
        let headers: Vec<String> = identity
            .iter()
            .map(|s| s.header.clone())
            .chain(members.iter().map(|s| s.header.clone()))
            .collect();
        let rows: Vec<Map<String, Value>> = clean
            .rows
            .iter()
            .map(|row| {
                headers
                    .iter()
                    .filter_map(|h| row.get(h).map(|v| (h.clone(), v.clone())))
                    .collect()
            })
            .collect();
        let mut parts = vec![format!("--- {name}.{prefix} ({} rows) ---", rows.len())];
        parts.push(toon::encode_rows(&rows, &headers));
        blocks.push(parts.join("\n"));
    }
    blocks
}

/// Encode scalar key/value pairs as their own block.
fn render_scalars(name: &str, flat: &Map<String, Value>) -> String {
    format!("--- {name} (scalars) ---\n{}", toon::encode_object(flat))
}

/// Recursively condense a value into blocks.
pub fn condense(name: &str, value: &Value, heuristics: &Heuristics) -> Vec<String> {
    let mut blocks = Vec::new();
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            blocks.push(format!("{name}: {}", fmt(value)));
        }
        Value::Object(obj) => {
            let fl = flatten(obj);
            let mut scalars = Map::new();
            let mut arrays: Vec<(String, Vec<Value>)> = Vec::new();
            for (k, v) in fl {
                match v {
                    Value::Array(arr) => arrays.push((k, arr)),
                    other => {
                        scalars.insert(k, other);
                    }
                }
            }
            if !scalars.is_empty() {
                blocks.push(render_scalars(name, &scalars));
            }
            for (ak, av) in arrays {
                let an = if name.is_empty() {
                    ak
                } else {
                    format!("{name}.{ak}")
                };
                blocks.extend(condense_array(&an, &av, heuristics));
            }
        }
        Value::Array(arr) => {
            blocks.extend(condense_array(name, arr, heuristics));
        }
    }
    blocks
}

fn condense_array(name: &str, arr: &[Value], heuristics: &Heuristics) -> Vec<String> {
    let rows = if heuristics.pivot_key_value {
        pivot_kv_arrays(arr)
    } else {
        arr.to_vec()
    };
    if is_homogeneous_array(&rows) {
        render_table_rows(name, &rows, heuristics)
    } else if arr.first().is_some_and(Value::is_object) {
        let mut blocks = Vec::new();
        for (i, item) in arr.iter().enumerate() {
            blocks.extend(condense(&format!("{name}[{i}]"), item, heuristics));
        }
        blocks
    } else {
        vec![format!(
            "{name}: {}",
            serde_json::to_string(arr).unwrap_or_default()
        )]
    }
}

/// True when the block is a bare `key: value` line rather than a section.
fn is_scalar_line(block: &str) -> bool {
    !block.contains('\n') && !block.starts_with("---")
}

/// Join blocks with blank-line separators, grouping runs of scalar lines.
fn join_blocks(blocks: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut scalar_group: Vec<&str> = Vec::new();
    for block in blocks {
        if is_scalar_line(block) {
            scalar_group.push(block);
        } else {
            if !scalar_group.is_empty() {
                parts.push(scalar_group.join("\n"));
                scalar_group.clear();
            }
            parts.push(block.clone());
        }
    }
    if !scalar_group.is_empty() {
        parts.push(scalar_group.join("\n"));
    }
    parts.join("\n\n")
}

/// Top-level entry point: condense a parsed value into the final text.
/// Each top-level object key becomes its own named section; any other
/// shape condenses under the name `root`.
pub fn condense_value(value: &Value, heuristics: &Heuristics) -> String {
    let blocks = match value {
        Value::Object(obj) => {
            let mut blocks = Vec::new();
            for (k, v) in obj {
                blocks.extend(condense(k, v, heuristics));
            }
            blocks
        }
        other => condense("root", other, heuristics),
    };
    join_blocks(&blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn h() -> Heuristics {
        Heuristics::default()
    }

    fn no_reductions() -> Heuristics {
        Heuristics::from_options(
            json!({
                "elide_all_zero": false, "elide_all_null": false,
                "elide_timestamps": false, "elide_constants": false,
                "group_tuples": false
            })
            .as_object()
            .unwrap(),
        )
        .unwrap()
    }

    fn wide_rows() -> Vec<Value> {
        ["pod-a", "pod-b", "pod-c"]
            .iter()
            .map(|name| {
                json!({
                    "podRef": {"name": name, "namespace": "default"},
                    "cpu": {"usageCoreNanoSeconds": 100, "usageNanoCores": 200},
                    "memory": {"rssBytes": 300, "usageBytes": 400, "workingSetBytes": 500},
                    "col6": 6, "col7": 7, "col8": 8, "col9": 9,
                    "col10": 10, "col11": 11, "col12": 12, "col13": 13
                })
            })
            .collect()
    }

    #[test]
    fn table_header_names_row_count() {
        let rows = vec![json!({"a": 1, "b": 2}), json!({"a": 3, "b": 4})];
        let blocks = render_table("items", &rows, &h());
        assert!(blocks[0].starts_with("--- items (2 rows) ---"), "{}", blocks[0]);
    }

    #[test]
    fn empty_array_block() {
        let blocks = render_table("items", &[], &h());
        assert_eq!(blocks, vec!["--- items ---\n(empty)".to_string()]);
    }

    #[test]
    fn annotations_precede_body() {
        let rows = vec![
            json!({"name": "a", "zero": 0, "v": 1}),
            json!({"name": "b", "zero": 0, "v": 2}),
        ];
        let blocks = render_table("t", &rows, &h());
        let lines: Vec<&str> = blocks[0].lines().collect();
        assert!(lines[0].starts_with("--- t (2 rows)"));
        assert!(lines[1].starts_with("  elided all_zero: zero"));
        assert!(lines[2].starts_with("[2]{"));
    }

    #[test]
    fn pivot_lifts_kv_arrays_into_columns() {
        let rows = vec![
            json!({"InstanceId": "i-aaa", "Tags": [
                {"Key": "Name", "Value": "web"}, {"Key": "Env", "Value": "prod"}]}),
            json!({"InstanceId": "i-bbb", "Tags": [
                {"Key": "Name", "Value": "api"}, {"Key": "Env", "Value": "staging"}]}),
        ];
        let text = render_table("Instances", &rows, &h()).join("\n\n");
        assert!(text.contains("Tags.Name"), "{text}");
        assert!(text.contains("Tags.Env"), "{text}");
        assert!(text.contains("web"));
        assert!(text.contains("staging"));
        assert!(!text.contains("Instances.Tags"), "{text}");
    }

    #[test]
    fn pivot_disabled_extracts_subtable() {
        let rows = vec![
            json!({"InstanceId": "i-aaa", "State": "running", "Tags": [
                {"Key": "Name", "Value": "web"}, {"Key": "Env", "Value": "prod"}]}),
            json!({"InstanceId": "i-bbb", "State": "stopped", "Tags": [
                {"Key": "Name", "Value": "api"}, {"Key": "Env", "Value": "staging"}]}),
        ];
        let mut heur = no_reductions();
        heur.pivot_key_value = false;
        let text = render_table("Instances", &rows, &heur).join("\n\n");
        assert!(text.contains("--- Instances.Tags"), "{text}");
        assert!(!text.contains("Tags.Name"), "{text}");
    }

    #[test]
    fn pivot_missing_key_renders_empty() {
        let rows = vec![
            json!({"id": "a", "Tags": [{"Key": "Env", "Value": "prod"}], "v": 1}),
            json!({"id": "b", "Tags": [{"Key": "Env", "Value": "dev"},
                                        {"Key": "Team", "Value": "core"}], "v": 2}),
        ];
        let pivoted = pivot_kv_arrays(&rows);
        assert_eq!(pivoted[0]["Tags.Team"], json!(""));
        assert_eq!(pivoted[1]["Tags.Team"], json!("core"));
        assert!(pivoted[0].get("Tags").is_none());
    }

    #[test]
    fn subtable_gets_parent_backreference() {
        let rows = vec![
            json!({"name": "pod-a", "phase": "Running", "containers": [
                {"image": "nginx", "restarts": 0}, {"image": "envoy", "restarts": 1}]}),
            json!({"name": "pod-b", "phase": "Pending", "containers": [
                {"image": "redis", "restarts": 2}]}),
        ];
        let heur = no_reductions();
        let text = render_table("pods", &rows, &heur).join("\n\n");
        assert!(text.contains("--- pods.containers (3 rows) ---"), "{text}");
        assert!(text.contains("_parent.name"), "{text}");
        assert!(text.contains("pod-a"));
        assert!(text.contains("envoy"));
    }

    #[test]
    fn vertical_mode_above_threshold() {
        let mut heur = no_reductions();
        heur.wide_table_threshold = 5;
        let text = render_table("pods", &wide_rows(), &heur).join("\n\n");
        assert!(text.contains("[pod-a]"), "{text}");
        assert!(text.contains("[pod-b]"));
        assert!(text.contains("[pod-c]"));
        assert!(text.contains("memory.rssBytes: 300"));
        assert!(text.contains("cpu.usageNanoCores: 200"));
        assert!(text.contains("col13: 13"));
        // Label column stays out of the bodies
        assert!(!text.lines().any(|l| l.trim_start().starts_with("podRef.name:")));
    }

    #[test]
    fn vertical_below_threshold_stays_tabular() {
        let mut heur = no_reductions();
        heur.wide_table_threshold = 50;
        let text = render_table("pods", &wide_rows(), &heur).join("\n\n");
        assert!(!text.contains("[pod-a]"));
        assert!(text.contains('{'));
    }

    #[test]
    fn vertical_numbers_rows_without_identity() {
        let rows = vec![
            json!({"val1": 1, "val2": 2, "val3": 3, "val4": 4, "val5": 5, "val6": 6}),
            json!({"val1": 7, "val2": 8, "val3": 9, "val4": 10, "val5": 11, "val6": 12}),
        ];
        let mut heur = no_reductions();
        heur.wide_table_threshold = 3;
        let text = render_table("data", &rows, &heur).join("\n\n");
        assert!(text.contains("[row 0]"), "{text}");
        assert!(text.contains("[row 1]"));
    }

    #[test]
    fn zero_threshold_never_goes_wide() {
        let mut heur = no_reductions();
        heur.wide_table_threshold = 0;
        let text = render_table("pods", &wide_rows(), &heur).join("\n\n");
        assert!(!text.contains("[pod-a]"));
    }

    #[test]
    fn split_mode_partitions_by_prefix() {
        let rows: Vec<Value> = ["pod-a", "pod-b"]
            .iter()
            .map(|name| {
                json!({
                    "podRef": {"name": name, "namespace": "default"},
                    "cpu": {"usageCoreNanoSeconds": 100, "usageNanoCores": 200},
                    "memory": {"rssBytes": 300, "usageBytes": 400, "workingSetBytes": 500},
                    "misc_col": 99
                })
            })
            .collect();
        let mut heur = no_reductions();
        heur.wide_table_threshold = 4;
        heur.wide_table_format = WideTableFormat::Split;
        let text = render_table("pods", &rows, &heur).join("\n\n");
        assert!(text.contains("--- pods.cpu"), "{text}");
        assert!(text.contains("--- pods.memory"), "{text}");
        assert!(text.contains("--- pods._misc"), "{text}");
        // Identity columns repeat in every partition
        for section in text.split("--- pods.").skip(1) {
            assert!(section.contains("podRef.name"), "{section}");
        }
        // No values lost
        assert!(text.contains("100"));
        assert!(text.contains("300"));
        assert!(text.contains("99"));
    }

    #[test]
    fn condense_simple_object() {
        let data = json!({"name": "test", "value": 42});
        let out = condense_value(&data, &h());
        assert!(out.contains("name"));
        assert!(out.contains("test"));
        assert!(out.contains("42"));
    }

    #[test]
    fn condense_object_with_table() {
        let data = json!({
            "kind": "List",
            "items": [
                {"name": "a", "v": 1},
                {"name": "b", "v": 2},
                {"name": "c", "v": 3}
            ]
        });
        let out = condense_value(&data, &h());
        assert!(out.contains("--- items (3 rows) ---"), "{out}");
        assert!(out.contains("kind: List"));
    }

    #[test]
    fn condense_heterogeneous_object_array_recurses() {
        let data = json!({"things": [
            {"alpha": 1, "beta": 2, "gamma": 3},
            {"delta": 4, "epsilon": 5, "zeta": 6}
        ]});
        let out = condense_value(&data, &h());
        assert!(out.contains("things[0]"), "{out}");
        assert!(out.contains("things[1]"));
    }

    #[test]
    fn condense_scalar_array_serializes_inline() {
        let data = json!({"ports": [80, 443]});
        let out = condense_value(&data, &h());
        assert!(out.contains("ports: [80,443]"), "{out}");
    }

    #[test]
    fn condense_top_level_array() {
        let data = json!([
            {"name": "a", "v": 1},
            {"name": "b", "v": 2}
        ]);
        let out = condense_value(&data, &h());
        assert!(out.contains("--- root (2 rows) ---"), "{out}");
    }

    #[test]
    fn condense_top_level_scalar() {
        assert_eq!(condense_value(&json!(42), &h()), "root: 42");
    }

    #[test]
    fn condense_groups_scalar_lines() {
        let data = json!({"a": 1, "b": 2, "c": [1, 2]});
        let out = condense_value(&data, &h());
        // Scalars render as one block via the scalars section, array inline
        assert!(out.contains("a: 1"));
        assert!(out.contains("c: [1,2]"));
    }

    #[test]
    fn condense_deterministic() {
        let data = json!({
            "items": [
                {"name": "a", "ts": "2024-01-01T00:00:00Z", "v": 1},
                {"name": "b", "ts": "2024-01-01T00:00:09Z", "v": 2}
            ]
        });
        assert_eq!(condense_value(&data, &h()), condense_value(&data, &h()));
    }

    #[test]
    fn condense_nested_object_scalars_dotted() {
        let data = json!({"meta": {"kind": "pod", "labels": {"app": "web"}}});
        let out = condense_value(&data, &h());
        assert!(out.contains("--- meta (scalars) ---"), "{out}");
        assert!(out.contains("kind: pod"), "{out}");
        assert!(out.contains("labels.app: web"), "{out}");
    }
}
