use serde_json::json;

use tooltrim::algo::parsers::ParserRegistry;
use tooltrim::algo::reduce::Heuristics;
use tooltrim::algo::tokens::{truncate_to_token_limit, EstimateCounter, TokenCounter};
use tooltrim::ops;

fn registry() -> ParserRegistry {
    ParserRegistry::builtin()
}

fn heuristics(options: serde_json::Value) -> Heuristics {
    Heuristics::from_options(options.as_object().unwrap()).unwrap()
}

/// Body of a condensed payload: everything that is not an annotation line.
fn body_of(text: &str) -> String {
    text.lines()
        .filter(|l| !l.trim_start().starts_with("elided"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn elision_trio_with_tuple_grouping() {
    let input = json!([
        {"name": "a", "zero_col": 0, "null_col": null, "const_col": "same",
         "ts": "2024-01-01T00:00:00Z", "vec": {"x": 1, "y": 2, "z": 3}},
        {"name": "b", "zero_col": 0, "null_col": null, "const_col": "same",
         "ts": "2024-01-01T00:00:05Z", "vec": {"x": 4, "y": 5, "z": 6}},
        {"name": "c", "zero_col": 0, "null_col": null, "const_col": "same",
         "ts": "2024-01-01T00:00:10Z", "vec": {"x": 7, "y": 8, "z": 9}}
    ])
    .to_string();

    let (out, format) =
        ops::op_condense_text(&input, &registry(), None, &Heuristics::default()).unwrap();
    assert_eq!(format, "json");
    assert!(out.contains("--- root (3 rows) ---"), "{out}");

    let annotations: Vec<&str> = out
        .lines()
        .filter(|l| l.starts_with("  elided "))
        .collect();
    assert_eq!(annotations.len(), 4, "{out}");
    assert!(out.contains("all_zero: zero_col"));
    assert!(out.contains("all_null: null_col"));
    assert!(out.contains("constant const_col: same"));
    assert!(out.contains("timestamp_cluster ts: ~2024-01-01T00:00:05Z"));

    let body = body_of(&out);
    assert!(body.contains("vec(x,y,z)"), "{body}");
    assert!(body.contains("1,2,3"));
    assert!(body.contains("4,5,6"));
    assert!(body.contains("7,8,9"));
    for gone in ["zero_col", "null_col", "const_col", "ts"] {
        assert!(!body.contains(gone), "{gone} leaked into body:\n{body}");
    }
}

#[test]
fn kv_arrays_pivot_into_parent_columns() {
    let input = json!({
        "Instances": [
            {"InstanceId": "i-aaa", "Tags": [
                {"Key": "Name", "Value": "web"}, {"Key": "Env", "Value": "prod"}]},
            {"InstanceId": "i-bbb", "Tags": [
                {"Key": "Name", "Value": "api"}, {"Key": "Env", "Value": "staging"}]}
        ]
    })
    .to_string();

    let (out, _) =
        ops::op_condense_text(&input, &registry(), None, &Heuristics::default()).unwrap();
    assert!(out.contains("Tags.Name"), "{out}");
    assert!(out.contains("Tags.Env"), "{out}");
    for val in ["i-aaa", "i-bbb", "web", "prod", "api", "staging"] {
        assert!(out.contains(val), "missing {val}:\n{out}");
    }
    assert!(!out.contains("Instances.Tags"), "{out}");
}

#[test]
fn mostly_zero_outliers_named_by_identity() {
    let input = json!([
        {"name": "a", "data_col": 100, "mostly_zero_col": 0},
        {"name": "b", "data_col": 200, "mostly_zero_col": 0},
        {"name": "c", "data_col": 300, "mostly_zero_col": 0},
        {"name": "d", "data_col": 400, "mostly_zero_col": 42},
        {"name": "e", "data_col": 500, "mostly_zero_col": 0}
    ])
    .to_string();

    let h = heuristics(json!({"elide_mostly_zero_pct": 0.8}));
    let (out, _) = ops::op_condense_text(&input, &registry(), None, &h).unwrap();
    assert!(
        out.contains("elided mostly_zero: mostly_zero_col (non-zero: d=42)"),
        "{out}"
    );
    assert!(!body_of(&out).contains("mostly_zero_col"));
}

#[test]
fn wide_table_renders_vertical_sections() {
    let rows: Vec<serde_json::Value> = ["pod-a", "pod-b", "pod-c"]
        .iter()
        .map(|name| {
            json!({
                "podRef": {"name": name},
                "cpu": {"usage": 1, "limit": 2},
                "memory": {"rss": 3, "usage": 4},
                "col5": 5, "col6": 6, "col7": 7, "col8": 8,
                "col9": 9, "col10": 10, "col11": 11, "col12": 12
            })
        })
        .collect();
    let input = serde_json::Value::Array(rows).to_string();

    let h = heuristics(json!({
        "wide_table_threshold": 5, "wide_table_format": "vertical",
        "elide_all_zero": false, "elide_all_null": false,
        "elide_timestamps": false, "elide_constants": false, "group_tuples": false
    }));
    let (out, _) = ops::op_condense_text(&input, &registry(), None, &h).unwrap();

    for label in ["[pod-a]", "[pod-b]", "[pod-c]"] {
        assert!(out.contains(label), "{out}");
    }
    assert!(out.contains("cpu.usage: 1"), "{out}");
    assert!(out.contains("memory.rss: 3"));
    assert!(out.contains("col12: 12"));
    assert!(
        !out.lines().any(|l| l.trim_start().starts_with("podRef.name:")),
        "label column leaked into bodies:\n{out}"
    );
}

#[test]
fn truncation_respects_limit_with_notice_margin() {
    let text = "tool output line\n".repeat(120); // ~500 tokens
    let counter = EstimateCounter;
    assert!(counter.count(&text) >= 400);

    let out = truncate_to_token_limit(&text, 50, &counter);
    assert!(counter.count(&out) <= 60, "{}", counter.count(&out));
    assert!(out.contains("[truncated:"), "{out}");
    assert!(out.len() < text.len());
}

#[test]
fn condense_never_materially_beats_plain_encoding() {
    // Reductions may add annotation lines but never inflate the body
    let input = json!({
        "items": [
            {"name": "a", "zero": 0, "constant": "same", "v": 1},
            {"name": "b", "zero": 0, "constant": "same", "v": 2},
            {"name": "c", "zero": 0, "constant": "same", "v": 3}
        ]
    })
    .to_string();

    let (condensed, _) =
        ops::op_condense_text(&input, &registry(), None, &Heuristics::default()).unwrap();
    let (encoded, _) = ops::op_encode_text(&input, &registry(), None).unwrap();

    let counter = EstimateCounter;
    let annotation_budget: usize = condensed
        .lines()
        .filter(|l| l.starts_with("  elided "))
        .map(|l| counter.count(l) + 1)
        .sum();
    // Block headers cost a little; allow them alongside the annotations
    let header_budget: usize = condensed
        .lines()
        .filter(|l| l.starts_with("--- "))
        .map(|l| counter.count(l) + 1)
        .sum();
    assert!(
        counter.count(&condensed) <= counter.count(&encoded) + annotation_budget + header_budget,
        "condensed {} vs encoded {}",
        counter.count(&condensed),
        counter.count(&encoded)
    );
}

#[test]
fn surviving_scalars_appear_in_output() {
    let input = json!({
        "summary": {"cluster": "prod-eu", "healthy": true},
        "nodes": [
            {"name": "node-1", "cpu": 12, "status": "Ready"},
            {"name": "node-2", "cpu": 48, "status": "NotReady"}
        ]
    })
    .to_string();
    let (out, _) =
        ops::op_condense_text(&input, &registry(), None, &Heuristics::default()).unwrap();
    for needle in ["prod-eu", "true", "node-1", "node-2", "12", "48", "Ready", "NotReady"] {
        assert!(out.contains(needle), "missing {needle}:\n{out}");
    }
}

#[test]
fn condense_is_deterministic() {
    let input = json!({
        "pods": [
            {"name": "a", "ts": "2024-05-01T10:00:00Z", "restarts": 0,
             "net": {"rx": 1, "tx": 2, "drops": 3}},
            {"name": "b", "ts": "2024-05-01T10:00:30Z", "restarts": 0,
             "net": {"rx": 4, "tx": 5, "drops": 6}}
        ]
    })
    .to_string();
    let h = Heuristics::default();
    let (a, _) = ops::op_condense_text(&input, &registry(), None, &h).unwrap();
    let (b, _) = ops::op_condense_text(&input, &registry(), None, &h).unwrap();
    assert_eq!(a, b);
}

#[test]
fn identity_columns_lead_the_header() {
    let input = json!([
        {"cpu": 10, "name": "a", "namespace": "default", "mem": 20},
        {"cpu": 30, "name": "b", "namespace": "kube-system", "mem": 40}
    ])
    .to_string();
    let (out, _) =
        ops::op_condense_text(&input, &registry(), None, &Heuristics::default()).unwrap();
    let header_line = out
        .lines()
        .find(|l| l.contains("]{"))
        .expect("tabular header");
    let cols: &str = header_line.split('{').nth(1).unwrap();
    let name_pos = cols.find("name").unwrap();
    let cpu_pos = cols.find("cpu").unwrap();
    let ns_pos = cols.find("namespace").unwrap();
    assert!(name_pos < cpu_pos, "{header_line}");
    assert!(ns_pos < cpu_pos, "{header_line}");
}

#[test]
fn csv_payload_condenses_like_json() {
    let input = "name,env,replicas\nweb,prod,3\napi,prod,2\nworker,prod,5\n";
    let (out, format) =
        ops::op_condense_text(input, &registry(), None, &Heuristics::default()).unwrap();
    assert_eq!(format, "csv");
    assert!(out.contains("--- root (3 rows) ---"), "{out}");
    // env is constant across rows and folds into an annotation
    assert!(out.contains("elided constant env: prod"), "{out}");
    for needle in ["web", "api", "worker", "3", "2", "5"] {
        assert!(out.contains(needle), "missing {needle}:\n{out}");
    }
}

#[test]
fn yaml_payload_parses_and_condenses() {
    let input = "items:\n  - name: a\n    v: 1\n  - name: b\n    v: 2\n";
    let (out, format) =
        ops::op_condense_text(input, &registry(), None, &Heuristics::default()).unwrap();
    assert_eq!(format, "yaml");
    assert!(out.contains("--- items (2 rows) ---"), "{out}");
}

#[test]
fn xml_payload_parses_and_condenses() {
    let input = "<response><status>ok</status><items>\
                 <item><name>a</name><v>1</v></item>\
                 <item><name>b</name><v>2</v></item>\
                 </items></response>";
    let (out, format) =
        ops::op_condense_text(input, &registry(), None, &Heuristics::default()).unwrap();
    assert_eq!(format, "xml");
    assert!(out.contains("status: ok"), "{out}");
    assert!(out.contains("(2 rows)"), "{out}");
}

#[test]
fn unregistered_hint_still_parses() {
    let input = r#"{"a": 1, "b": 2}"#;
    let (_, format) =
        ops::op_condense_text(input, &registry(), Some("protobuf"), &Heuristics::default())
            .unwrap();
    assert_eq!(format, "json");
}
