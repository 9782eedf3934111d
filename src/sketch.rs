//! Deterministic approximate statistics: KMV distinct-count sketch and
//! fixed-stride sampling.
//!
//! Profiles must be bit-for-bit reproducible, so every approximation here is
//! seed-free: value hashing is SHA-256-derived and sampling positions are a
//! pure function of input length. Swapping the estimator is local to this
//! module.

use crate::dataset::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Default number of minimum hashes retained by the sketch.
pub const DEFAULT_SKETCH_SIZE: usize = 1024;

/// 64-bit value hash with a fixed algorithm (first 8 bytes of SHA-256 over
/// the canonical cell encoding).
pub fn value_hash64(value: &Value) -> u64 {
    let mut buf = Vec::with_capacity(32);
    value.canonical_bytes(&mut buf);
    let digest = Sha256::digest(&buf);
    u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

/// K-minimum-values distinct-count sketch.
///
/// Keeps the `k` smallest distinct hashes seen. While fewer than `k` hashes
/// are retained the count is exact; at capacity the estimate is
/// `(k - 1) / u_k` with `u_k` the k-th smallest hash normalised to (0, 1].
pub struct KmvSketch {
    k: usize,
    mins: BTreeSet<u64>,
}

impl KmvSketch {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(2),
            mins: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, value: &Value) {
        self.insert_hash(value_hash64(value));
    }

    pub fn insert_hash(&mut self, hash: u64) {
        if self.mins.len() < self.k {
            self.mins.insert(hash);
            return;
        }
        let max = *self.mins.iter().next_back().expect("sketch at capacity");
        if hash < max && self.mins.insert(hash) {
            self.mins.remove(&max);
        }
    }

    /// Estimated number of distinct values inserted.
    pub fn estimate(&self) -> u64 {
        if self.mins.len() < self.k {
            return self.mins.len() as u64;
        }
        let kth = *self.mins.iter().next_back().expect("sketch at capacity");
        // Normalise to (0, 1]; kth is never 0 here unless all hashes are 0.
        let u_k = (kth as f64 + 1.0) / (u64::MAX as f64 + 1.0);
        ((self.k as f64 - 1.0) / u_k).round() as u64
    }
}

/// Indices of a deterministic fixed-stride sample of `cap` items out of
/// `len`. Returns the full range when it already fits.
pub fn stride_sample_indices(len: usize, cap: usize) -> Vec<usize> {
    if len <= cap || cap == 0 {
        return (0..len).collect();
    }
    let stride = len.div_ceil(cap);
    (0..len).step_by(stride).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_below_capacity() {
        let mut sketch = KmvSketch::new(64);
        for i in 0..50 {
            sketch.insert(&Value::Integer(i));
        }
        // Duplicates do not grow the sketch.
        for i in 0..50 {
            sketch.insert(&Value::Integer(i));
        }
        assert_eq!(sketch.estimate(), 50);
    }

    #[test]
    fn test_estimate_within_tolerance() {
        let mut sketch = KmvSketch::new(256);
        let true_distinct = 20_000u64;
        for i in 0..true_distinct {
            sketch.insert(&Value::Integer(i as i64));
        }
        let estimate = sketch.estimate() as f64;
        let error = (estimate - true_distinct as f64).abs() / true_distinct as f64;
        assert!(error < 0.15, "estimate {estimate} off by {error}");
    }

    #[test]
    fn test_estimate_is_deterministic() {
        let run = || {
            let mut sketch = KmvSketch::new(128);
            for i in 0..5_000 {
                sketch.insert(&Value::Text(format!("row-{i}")));
            }
            sketch.estimate()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_stride_sample() {
        assert_eq!(stride_sample_indices(5, 10), vec![0, 1, 2, 3, 4]);
        let sampled = stride_sample_indices(100, 10);
        assert!(sampled.len() <= 10);
        assert_eq!(sampled[0], 0);
        assert_eq!(sampled, stride_sample_indices(100, 10));
    }

    #[test]
    fn test_value_hash_distinguishes_variants() {
        assert_ne!(
            value_hash64(&Value::Integer(1)),
            value_hash64(&Value::Text("1".into()))
        );
        assert_eq!(
            value_hash64(&Value::Float(2.0)),
            value_hash64(&Value::Float(2.0))
        );
    }
}
