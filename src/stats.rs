//! Numeric statistics kernels: running moments, quantiles, correlation

use crate::dataset::{Column, Value};
use serde::{Deserialize, Serialize};

/// Welford running moments: numerically stable mean and variance in one
/// pass.
#[derive(Debug, Default, Clone)]
pub struct RunningMoments {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningMoments {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Population variance. Undefined for empty input.
    pub fn variance(&self) -> Option<f64> {
        (self.count > 0).then(|| self.m2 / self.count as f64)
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}

/// Quantile summary over a numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantiles {
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
}

/// Quantiles by linear interpolation over an already sorted slice.
pub fn quantiles_of_sorted(sorted: &[f64]) -> Option<Quantiles> {
    if sorted.is_empty() {
        return None;
    }
    Some(Quantiles {
        p25: interpolate(sorted, 0.25),
        p50: interpolate(sorted, 0.50),
        p75: interpolate(sorted, 0.75),
    })
}

fn interpolate(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = q * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Pairwise Pearson correlation between two columns, computed over rows
/// where both cells are numeric and non-null. Zero variance on either side
/// makes the coefficient undefined (`None`), not 0 or 1.
pub fn pearson(xs: &Column, ys: &Column) -> Option<f64> {
    debug_assert_eq!(xs.len(), ys.len());

    let pairs: Vec<(f64, f64)> = xs
        .values
        .iter()
        .zip(&ys.values)
        .filter_map(|(x, y)| Some((x.as_f64()?, y.as_f64()?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// Min and max over the numeric cells of a slice of values.
pub fn numeric_min_max(values: &[Value]) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut seen = false;
    for v in values {
        if let Some(x) = v.as_f64() {
            if x.is_nan() {
                continue;
            }
            seen = true;
            min = min.min(x);
            max = max.max(x);
        }
    }
    seen.then_some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, ColumnType};

    fn float_col(name: &str, xs: &[Option<f64>]) -> Column {
        Column::new(
            name,
            ColumnType::Float,
            xs.iter()
                .map(|v| v.map_or(Value::Null, Value::Float))
                .collect(),
        )
    }

    #[test]
    fn test_welford_matches_direct_formula() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut m = RunningMoments::default();
        for x in data {
            m.push(x);
        }
        assert!((m.mean().unwrap() - 5.0).abs() < 1e-12);
        assert!((m.std_dev().unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_moments_undefined_when_empty() {
        let m = RunningMoments::default();
        assert_eq!(m.mean(), None);
        assert_eq!(m.std_dev(), None);
    }

    #[test]
    fn test_quantile_interpolation() {
        let q = quantiles_of_sorted(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((q.p25 - 1.75).abs() < 1e-12);
        assert!((q.p50 - 2.5).abs() < 1e-12);
        assert!((q.p75 - 3.25).abs() < 1e-12);
        assert_eq!(quantiles_of_sorted(&[]), None);
    }

    #[test]
    fn test_pearson_perfect_correlation() {
        let x = float_col("x", &[Some(1.0), Some(2.0), Some(3.0)]);
        let y = float_col("y", &[Some(2.0), Some(4.0), Some(6.0)]);
        let r = pearson(&x, &y).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_skips_null_pairs() {
        let x = float_col("x", &[Some(1.0), None, Some(3.0), Some(4.0)]);
        let y = float_col("y", &[Some(2.0), Some(9.0), None, Some(8.0)]);
        // Only rows 0 and 3 survive; two points are always perfectly
        // correlated.
        let r = pearson(&x, &y).unwrap();
        assert!((r.abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_zero_variance_is_undefined() {
        let x = float_col("x", &[Some(5.0), Some(5.0), Some(5.0)]);
        let y = float_col("y", &[Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(pearson(&x, &y), None);
    }
}
