use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use stratum_index::model::{diff_values, patch_value, Value};

fn sample(field_count: usize) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for i in 0..field_count {
        map.insert(format!("field_{i}"), json!(format!("value-{i}")));
    }
    serde_json::Value::Object(map)
}

fn criterion_benchmark(c: &mut Criterion) {
    let base = Value::normalize(&sample(200)).unwrap();
    let mut changed = sample(200);
    changed["field_10"] = json!("changed");
    changed["field_150"] = json!("also changed");
    let new = Value::normalize(&changed).unwrap();

    c.bench_function("diff_200_fields_2_changed", |b| {
        b.iter(|| diff_values(black_box(&base), black_box(&new)).unwrap())
    });

    let ops = diff_values(&base, &new).unwrap();
    c.bench_function("patch_200_fields_2_changed", |b| {
        b.iter(|| patch_value(black_box(&base), black_box(&ops)).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
