use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tablens_core::{Column, ColumnType, Dataset, Profiler, QueryEngine, Value};

fn synthetic_dataset(rows: usize) -> Dataset {
    let ids: Vec<Value> = (0..rows).map(|i| Value::Integer(i as i64)).collect();
    let amounts: Vec<Value> = (0..rows)
        .map(|i| Value::Float((i as f64 * 1.37) % 500.0))
        .collect();
    let tags: Vec<Value> = (0..rows)
        .map(|i| Value::Text(format!("tag-{}", i % 37)))
        .collect();
    Dataset::new(vec![
        Column::new("id", ColumnType::Integer, ids),
        Column::new("amount", ColumnType::Float, amounts),
        Column::new("tag", ColumnType::Text, tags),
    ])
    .unwrap()
}

fn bench_profile(c: &mut Criterion) {
    let profiler = Profiler::default();
    for rows in [1_000, 50_000] {
        let ds = synthetic_dataset(rows);
        c.bench_function(&format!("profile_{rows}_rows"), |b| {
            b.iter(|| profiler.profile(black_box(&ds)))
        });
    }
}

fn bench_query(c: &mut Criterion) {
    let ds = synthetic_dataset(50_000);
    c.bench_function("query_filter_50k_rows", |b| {
        b.iter(|| {
            QueryEngine::execute(
                black_box("SELECT id, amount FROM t WHERE amount > 250.0"),
                &ds,
            )
            .unwrap()
        })
    });
    c.bench_function("query_group_by_50k_rows", |b| {
        b.iter(|| {
            QueryEngine::execute(
                black_box("SELECT tag, COUNT(*), AVG(amount) FROM t GROUP BY tag"),
                &ds,
            )
            .unwrap()
        })
    });
}

fn bench_fingerprint(c: &mut Criterion) {
    c.bench_function("fingerprint_50k_rows", |b| {
        b.iter(|| synthetic_dataset(black_box(50_000)))
    });
}

criterion_group!(benches, bench_profile, bench_query, bench_fingerprint);
criterion_main!(benches);
