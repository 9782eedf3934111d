//! Profiler properties over generated and ingested data

use proptest::prelude::*;
use tablens_core::{
    Column, ColumnType, DataSource, Dataset, Histogram, Profiler, ProfilerConfig, Value,
};

fn int_dataset(values: Vec<Option<i64>>) -> Dataset {
    Dataset::new(vec![Column::new(
        "x",
        ColumnType::Integer,
        values
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::Integer))
            .collect(),
    )])
    .unwrap()
}

proptest! {
    #[test]
    fn prop_profile_is_deterministic(values in prop::collection::vec(
        prop::option::of(-1_000i64..1_000), 0..300
    )) {
        let ds = int_dataset(values);
        let profiler = Profiler::default();
        prop_assert_eq!(profiler.profile(&ds), profiler.profile(&ds));
    }

    #[test]
    fn prop_fingerprint_tracks_content(values in prop::collection::vec(
        prop::option::of(any::<i64>()), 1..100
    )) {
        let a = int_dataset(values.clone());
        let b = int_dataset(values.clone());
        prop_assert_eq!(a.fingerprint(), b.fingerprint());

        let mut changed = values;
        let first = changed[0].map_or(0, |v| v.wrapping_add(1));
        changed[0] = Some(first);
        let c = int_dataset(changed);
        // The edit always flips cell 0 to a different value or nullness.
        prop_assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn prop_counts_are_consistent(values in prop::collection::vec(
        prop::option::of(any::<i64>()), 0..300
    )) {
        let ds = int_dataset(values);
        let profile = Profiler::default().profile(&ds);
        let col = &profile.columns[0];
        prop_assert_eq!(col.non_null_count + col.null_count, col.row_count);
        prop_assert!(col.missing_pct >= 0.0 && col.missing_pct <= 100.0);
        if let Some(distinct) = col.distinct_count {
            prop_assert!(distinct <= col.non_null_count);
        }
    }

    #[test]
    fn prop_numeric_summary_is_ordered(values in prop::collection::vec(
        -1_000_000i64..1_000_000, 1..500
    )) {
        let ds = int_dataset(values.into_iter().map(Some).collect());
        let profile = Profiler::default().profile(&ds);
        let numeric = profile.columns[0].numeric.as_ref().unwrap();
        prop_assert!(numeric.min <= numeric.quantiles.p25);
        prop_assert!(numeric.quantiles.p25 <= numeric.quantiles.p50);
        prop_assert!(numeric.quantiles.p50 <= numeric.quantiles.p75);
        prop_assert!(numeric.quantiles.p75 <= numeric.max);
        prop_assert!(numeric.min <= numeric.mean && numeric.mean <= numeric.max);
        prop_assert!(numeric.std_dev >= 0.0);
    }

    #[test]
    fn prop_histogram_counts_cover_non_null_values(values in prop::collection::vec(
        -1_000i64..1_000, 1..500
    )) {
        let expected = values.len() as u64;
        let ds = int_dataset(values.into_iter().map(Some).collect());
        let profile = Profiler::default().profile(&ds);
        match profile.columns[0].histogram.as_ref().unwrap() {
            Histogram::Numeric(buckets) => {
                prop_assert_eq!(buckets.iter().map(|b| b.count).sum::<u64>(), expected);
            }
            other => prop_assert!(false, "unexpected histogram {:?}", other),
        }
    }

    #[test]
    fn prop_correlation_is_symmetric_and_bounded(pairs in prop::collection::vec(
        (-1_000i64..1_000, -1_000i64..1_000), 3..200
    )) {
        let (xs, ys): (Vec<i64>, Vec<i64>) = pairs.into_iter().unzip();
        let ds = Dataset::new(vec![
            Column::new("x", ColumnType::Integer, xs.into_iter().map(Value::Integer).collect()),
            Column::new("y", ColumnType::Integer, ys.into_iter().map(Value::Integer).collect()),
        ]).unwrap();
        let profile = Profiler::default().profile(&ds);
        let matrix = profile.correlation.as_ref().unwrap();
        let xy = matrix.get("x", "y");
        let yx = matrix.get("y", "x");
        prop_assert_eq!(xy, yx);
        if let Some(r) = xy {
            prop_assert!((-1.0 - 1e-9..=1.0 + 1e-9).contains(&r));
        }
    }
}

#[tokio::test]
async fn test_profile_of_ingested_csv_reflects_inferred_types() {
    let csv = "id,price,active,when,label\n\
               1,9.5,true,2024-01-01,alpha\n\
               2,8.25,false,2024-01-02,beta\n\
               3,,true,2024-01-03,alpha\n";
    let ds = DataSource::delimited_bytes(csv.as_bytes().to_vec(), b',', true)
        .load()
        .await
        .unwrap();
    let profile = Profiler::default().profile(&ds);

    let types: Vec<ColumnType> = profile.columns.iter().map(|c| c.ty).collect();
    assert_eq!(
        types,
        vec![
            ColumnType::Integer,
            ColumnType::Float,
            ColumnType::Boolean,
            ColumnType::Timestamp,
            ColumnType::Text,
        ]
    );

    let price = &profile.columns[1];
    assert_eq!(price.null_count, 1);
    let numeric = price.numeric.as_ref().unwrap();
    assert_eq!(numeric.min, 8.25);
    assert_eq!(numeric.max, 9.5);

    let label = &profile.columns[4];
    assert_eq!(label.distinct_count, Some(2));
    assert_eq!(label.top_values[0], ("alpha".to_string(), 2));
}

#[test]
fn test_approximate_estimate_tracks_true_cardinality() {
    let config = ProfilerConfig {
        cardinality_threshold: 500,
        ..Default::default()
    };
    let values: Vec<Option<i64>> = (0..20_000).map(Some).collect();
    let ds = int_dataset(values);
    let profile = Profiler::new(config).profile(&ds);
    let estimate = profile.columns[0].distinct_count.unwrap() as f64;
    // KMV with k=1024 should land within a few percent at this scale.
    assert!(
        (estimate - 20_000.0).abs() / 20_000.0 < 0.1,
        "estimate {estimate}"
    );
}
