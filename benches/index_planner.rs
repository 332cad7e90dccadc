use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use stratum_index::index::{generate_index_ops, ArcStatus, IndexNames};
use stratum_index::model::{diff_values, ParsingOptionsBuilder, StoredRecord, Value};

fn record_with_history(versions: usize) -> StoredRecord {
    let mut data = Value::normalize(&json!({"name": "v0"})).unwrap();
    let mut diffs = BTreeMap::new();
    for v in 1..versions {
        let next = Value::normalize(&json!({"name": format!("v{v}")})).unwrap();
        diffs.insert(v as i64, diff_values(&next, &data).unwrap());
        data = next;
    }
    StoredRecord {
        id: "bench-record".to_string(),
        version: Some(versions as i64),
        data,
        diffs,
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    let indices = IndexNames::new("bench");
    let mut options = BTreeMap::new();
    options.insert(1, ParsingOptionsBuilder::new().with_defaults().build());
    let record = record_with_history(50);

    c.bench_function("plan_record_with_50_versions", |b| {
        b.iter(|| {
            generate_index_ops(
                black_box(&indices),
                ArcStatus::default(),
                black_box(&record),
                black_box(&options),
                None,
                2_000_000,
            )
            .unwrap()
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
