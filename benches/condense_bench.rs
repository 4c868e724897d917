use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

use tooltrim::algo::reduce::Heuristics;
use tooltrim::algo::render::condense_value;
use tooltrim::algo::toon;

/// Kubernetes-summary-shaped fixture: wide rows with zero columns, clustered
/// timestamps, and tuple-groupable metrics.
fn pods_fixture(n: usize) -> Value {
    let pods: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "podRef": {"name": format!("pod-{i}"), "namespace": "default"},
                "startTime": format!("2024-05-01T10:00:{:02}Z", i % 50),
                "cpu": {"usageNanoCores": i * 1000, "usageCoreNanoSeconds": i * 7000},
                "memory": {"rssBytes": i * 4096, "usageBytes": i * 8192, "workingSetBytes": i * 6144},
                "swap": {"swapUsageBytes": 0},
                "ephemeral-storage": {"usedBytes": 0, "inodesUsed": 0},
                "restarts": 0
            })
        })
        .collect();
    json!({"pods": pods})
}

fn bench_condense(c: &mut Criterion) {
    let data = pods_fixture(200);
    let heuristics = Heuristics::default();
    c.bench_function("condense_200_pods", |b| {
        b.iter(|| condense_value(black_box(&data), &heuristics))
    });
}

fn bench_encode(c: &mut Criterion) {
    let data = pods_fixture(200);
    c.bench_function("encode_200_pods", |b| b.iter(|| toon::encode(black_box(&data))));
}

criterion_group!(benches, bench_condense, bench_encode);
criterion_main!(benches);
