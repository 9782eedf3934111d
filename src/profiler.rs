//! Statistical profiling of datasets
//!
//! Per column, a single pass maintains counts, min/max, and Welford moments,
//! alongside either an exact frequency table (cardinality at or below
//! `cardinality_threshold`) or a KMV distinct sketch above it. Quantiles take
//! a bounded second pass: exact when the non-null count fits `sample_size`,
//! otherwise over a deterministic fixed-stride sample. Both switches are
//! explicit, test-visible modes rather than silent fallbacks.
//!
//! Profiling never fails on well-typed input: empty datasets, all-null
//! columns, and zero-variance columns produce `None` statistics, not errors.
//! Identical dataset + identical config always yields a bit-identical
//! profile; nothing here reads the clock or a random seed.

use crate::dataset::{Column, ColumnType, Dataset, Fingerprint, Value};
use crate::sketch::{stride_sample_indices, value_hash64, KmvSketch, DEFAULT_SKETCH_SIZE};
use crate::stats::{self, Quantiles, RunningMoments};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

/// Profiling configuration, supplied at process start and immutable
/// thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilerConfig {
    /// Row cap above which quantiles use a deterministic stride sample.
    pub sample_size: usize,
    /// Distinct-value ceiling for the exact frequency table; above it the
    /// KMV sketch takes over.
    pub cardinality_threshold: usize,
    /// Fixed bucket count per column histogram.
    pub histogram_buckets: usize,
    /// Number of most-frequent values reported per column.
    pub top_k: usize,
    /// Whether to compute the numeric correlation matrix.
    pub correlation: bool,
    /// Column-count ceiling above which correlation is skipped even when
    /// enabled (O(columns^2) cost).
    pub correlation_column_ceiling: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            sample_size: 50_000,
            cardinality_threshold: 10_000,
            histogram_buckets: 20,
            top_k: 10,
            correlation: true,
            correlation_column_ceiling: 64,
        }
    }
}

impl ProfilerConfig {
    /// Stable hash of the configuration, part of the cache key.
    pub fn config_hash(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update((self.sample_size as u64).to_le_bytes());
        hasher.update((self.cardinality_threshold as u64).to_le_bytes());
        hasher.update((self.histogram_buckets as u64).to_le_bytes());
        hasher.update((self.top_k as u64).to_le_bytes());
        hasher.update([u8::from(self.correlation)]);
        hasher.update((self.correlation_column_ceiling as u64).to_le_bytes());
        let digest = hasher.finalize();
        u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
    }

    pub fn validate(&self) -> crate::Result<()> {
        for (name, v) in [
            ("sample_size", self.sample_size),
            ("cardinality_threshold", self.cardinality_threshold),
            ("histogram_buckets", self.histogram_buckets),
            ("top_k", self.top_k),
        ] {
            if v == 0 {
                return Err(crate::TabLensError::Configuration(format!(
                    "{name} must be a positive integer"
                )));
            }
        }
        Ok(())
    }
}

/// Which quantile path produced the numeric summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantileMode {
    Exact,
    Sampled,
}

/// Which cardinality path produced the distinct count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistinctMode {
    Exact,
    Approximate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

/// Bounded per-column distribution summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Histogram {
    /// Equi-width buckets over [min, max] for numeric columns.
    Numeric(Vec<HistogramBucket>),
    /// Most frequent values for everything else, bounded by the configured
    /// bucket count.
    Frequency(Vec<(String, u64)>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub quantiles: Quantiles,
    pub quantile_mode: QuantileMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStats {
    pub min_len: u64,
    pub max_len: u64,
    pub mean_len: f64,
}

/// Per-column statistics. `None` means a statistic is undefined for this
/// column (wrong type, zero rows, or all-null), never that profiling failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub ty: ColumnType,
    pub row_count: u64,
    pub non_null_count: u64,
    pub null_count: u64,
    pub missing_pct: f64,
    pub distinct_count: Option<u64>,
    pub distinct_mode: DistinctMode,
    pub numeric: Option<NumericStats>,
    pub text: Option<TextStats>,
    /// Most frequent values with counts; defined only in exact-cardinality
    /// mode.
    pub top_values: Vec<(String, u64)>,
    pub histogram: Option<Histogram>,
}

/// Pearson correlation over numeric columns. Cells are `None` where the
/// coefficient is undefined (zero variance, fewer than two shared rows).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub cells: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        self.cells[i][j]
    }
}

/// Complete statistical profile of a dataset snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub fingerprint: Fingerprint,
    pub row_count: u64,
    pub column_count: u64,
    pub missing_total: u64,
    pub memory_estimate_bytes: u64,
    pub columns: Vec<ColumnProfile>,
    pub correlation: Option<CorrelationMatrix>,
}

pub struct Profiler {
    config: ProfilerConfig,
}

impl Profiler {
    pub fn new(config: ProfilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Profile a dataset snapshot. Pure function of (dataset, config).
    pub fn profile(&self, dataset: &Dataset) -> DatasetProfile {
        let columns: Vec<ColumnProfile> = dataset
            .columns()
            .par_iter()
            .map(|col| profile_column(col, &self.config))
            .collect();

        let correlation = if self.config.correlation
            && dataset.column_count() <= self.config.correlation_column_ceiling
        {
            Some(correlation_matrix(dataset))
        } else {
            None
        };

        debug!(
            fingerprint = %dataset.fingerprint().short(),
            columns = columns.len(),
            "profile computed"
        );

        DatasetProfile {
            fingerprint: dataset.fingerprint(),
            row_count: dataset.row_count() as u64,
            column_count: dataset.column_count() as u64,
            missing_total: dataset.missing_count() as u64,
            memory_estimate_bytes: dataset.memory_estimate() as u64,
            columns,
            correlation,
        }
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(ProfilerConfig::default())
    }
}

fn profile_column(col: &Column, config: &ProfilerConfig) -> ColumnProfile {
    let row_count = col.len() as u64;
    let null_count = col.null_count() as u64;
    let non_null_count = row_count - null_count;
    let missing_pct = if row_count > 0 {
        null_count as f64 / row_count as f64 * 100.0
    } else {
        0.0
    };

    let (distinct_count, distinct_mode, frequency) = count_distinct(col, config);

    let top_values = frequency
        .as_ref()
        .map(|table| top_entries(table, config.top_k))
        .unwrap_or_default();

    let numeric = col
        .ty
        .is_numeric()
        .then(|| numeric_stats(col, config))
        .flatten();

    let text = matches!(col.ty, ColumnType::Text | ColumnType::Mixed)
        .then(|| text_stats(col))
        .flatten();

    let histogram = build_histogram(col, config, frequency.as_ref());

    ColumnProfile {
        name: col.name.clone(),
        ty: col.ty,
        row_count,
        non_null_count,
        null_count,
        missing_pct,
        distinct_count,
        distinct_mode,
        numeric,
        text,
        top_values,
        histogram,
    }
}

/// Exact frequency table while cardinality permits, KMV sketch beyond.
/// Returns (distinct count, mode, frequency table if exact).
#[allow(clippy::type_complexity)]
fn count_distinct(
    col: &Column,
    config: &ProfilerConfig,
) -> (Option<u64>, DistinctMode, Option<HashMap<u64, (String, u64)>>) {
    if col.values.iter().all(Value::is_null) {
        return (None, DistinctMode::Exact, None);
    }

    let mut table: HashMap<u64, (String, u64)> = HashMap::new();
    let mut overflowed = false;
    let mut sketch = KmvSketch::new(DEFAULT_SKETCH_SIZE);

    for value in &col.values {
        if value.is_null() {
            continue;
        }
        let hash = value_hash64(value);
        if overflowed {
            sketch.insert_hash(hash);
            continue;
        }
        match table.get_mut(&hash) {
            Some(entry) => entry.1 += 1,
            None => {
                if table.len() == config.cardinality_threshold {
                    // Cardinality exceeded the exact budget; hand the hashes
                    // seen so far to the sketch and continue with it alone.
                    for seen in table.keys() {
                        sketch.insert_hash(*seen);
                    }
                    sketch.insert_hash(hash);
                    table.clear();
                    overflowed = true;
                } else {
                    table.insert(hash, (value.to_string(), 1));
                }
            }
        }
    }

    if overflowed {
        (Some(sketch.estimate()), DistinctMode::Approximate, None)
    } else {
        (
            Some(table.len() as u64),
            DistinctMode::Exact,
            Some(table),
        )
    }
}

/// Deterministic top-k: ties broken by value representation.
fn top_entries(table: &HashMap<u64, (String, u64)>, k: usize) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = table.values().cloned().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(k);
    entries
}

fn numeric_stats(col: &Column, config: &ProfilerConfig) -> Option<NumericStats> {
    let mut moments = RunningMoments::default();
    let mut values: Vec<f64> = Vec::new();
    for v in &col.values {
        if let Some(x) = v.as_f64() {
            if x.is_nan() {
                continue;
            }
            moments.push(x);
            values.push(x);
        }
    }
    if values.is_empty() {
        return None;
    }

    let (min, max) = stats::numeric_min_max(&col.values)?;

    let (quantile_mode, mut sample) = if values.len() <= config.sample_size {
        (QuantileMode::Exact, values)
    } else {
        let indices = stride_sample_indices(values.len(), config.sample_size);
        (
            QuantileMode::Sampled,
            indices.into_iter().map(|i| values[i]).collect(),
        )
    };
    sample.sort_by(f64::total_cmp);
    let quantiles = stats::quantiles_of_sorted(&sample)?;

    Some(NumericStats {
        min,
        max,
        mean: moments.mean()?,
        std_dev: moments.std_dev()?,
        quantiles,
        quantile_mode,
    })
}

fn text_stats(col: &Column) -> Option<TextStats> {
    let mut min_len = u64::MAX;
    let mut max_len = 0u64;
    let mut total = 0u64;
    let mut count = 0u64;
    for v in &col.values {
        if let Value::Text(s) = v {
            let len = s.chars().count() as u64;
            min_len = min_len.min(len);
            max_len = max_len.max(len);
            total += len;
            count += 1;
        }
    }
    (count > 0).then(|| TextStats {
        min_len,
        max_len,
        mean_len: total as f64 / count as f64,
    })
}

fn build_histogram(
    col: &Column,
    config: &ProfilerConfig,
    frequency: Option<&HashMap<u64, (String, u64)>>,
) -> Option<Histogram> {
    if col.ty.is_numeric() {
        return numeric_histogram(col, config.histogram_buckets);
    }
    // Non-numeric columns get a bounded frequency table; undefined when the
    // cardinality sketch took over.
    let table = frequency?;
    if table.is_empty() {
        return None;
    }
    Some(Histogram::Frequency(top_entries(
        table,
        config.histogram_buckets,
    )))
}

fn numeric_histogram(col: &Column, buckets: usize) -> Option<Histogram> {
    let (min, max) = stats::numeric_min_max(&col.values)?;
    if min == max {
        let count = col
            .values
            .iter()
            .filter(|v| v.as_f64().is_some_and(|x| !x.is_nan()))
            .count() as u64;
        return Some(Histogram::Numeric(vec![HistogramBucket {
            lower: min,
            upper: max,
            count,
        }]));
    }

    let width = (max - min) / buckets as f64;
    let mut counts = vec![0u64; buckets];
    for v in &col.values {
        if let Some(x) = v.as_f64() {
            if x.is_nan() {
                continue;
            }
            let idx = (((x - min) / width) as usize).min(buckets - 1);
            counts[idx] += 1;
        }
    }
    Some(Histogram::Numeric(
        counts
            .into_iter()
            .enumerate()
            .map(|(i, count)| HistogramBucket {
                lower: min + width * i as f64,
                upper: if i + 1 == buckets {
                    max
                } else {
                    min + width * (i + 1) as f64
                },
                count,
            })
            .collect(),
    ))
}

fn correlation_matrix(dataset: &Dataset) -> CorrelationMatrix {
    let numeric: Vec<&Column> = dataset
        .columns()
        .iter()
        .filter(|c| c.ty.is_numeric())
        .collect();
    let columns: Vec<String> = numeric.iter().map(|c| c.name.clone()).collect();

    let cells: Vec<Vec<Option<f64>>> = numeric
        .par_iter()
        .map(|a| numeric.iter().map(|b| stats::pearson(a, b)).collect::<Vec<_>>())
        .collect();

    CorrelationMatrix { columns, cells }
}
