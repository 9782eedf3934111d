//! Columnar dataset model: values, columns, fingerprints

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// A single typed cell. NULL is a first-class variant so that missingness
/// survives every stage of querying and profiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it has one. Booleans and text do not
    /// coerce; integer-to-float widening does.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Canonical byte encoding used for fingerprints and the distinct-count
    /// sketch. Must be stable across runs and injective per variant.
    pub fn canonical_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.push(0),
            Value::Integer(i) => {
                out.push(1);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(f) => {
                out.push(2);
                // Normalise NaN so equal content hashes equally.
                let bits = if f.is_nan() {
                    f64::NAN.to_bits()
                } else {
                    f.to_bits()
                };
                out.extend_from_slice(&bits.to_le_bytes());
            }
            Value::Boolean(b) => {
                out.push(3);
                out.push(u8::from(*b));
            }
            Value::Timestamp(ts) => {
                out.push(4);
                out.extend_from_slice(&ts.and_utc().timestamp_micros().to_le_bytes());
            }
            Value::Text(s) => {
                out.push(5);
                out.extend_from_slice(&(s.len() as u64).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Timestamp(ts) => write!(f, "{}", ts),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Closed set of column types. Fixed at ingestion, never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Timestamp,
    Text,
    /// Inference disagreed between the sampled prefix and the full scan;
    /// cells are kept as text.
    Mixed,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    /// SQL type name used by schema rendering.
    pub fn sql_name(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "DOUBLE",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Text | ColumnType::Mixed => "VARCHAR",
        }
    }
}

/// A named column of uniform declared type.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            ty,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }
}

/// Deterministic content identifier of a dataset, used as the cache
/// partition key. SHA-256 over schema and every cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Fingerprint(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// An immutable tabular snapshot. Replaced wholesale on reload; readers hold
/// an `Arc` and never observe mutation.
#[derive(Debug)]
pub struct Dataset {
    columns: Vec<Column>,
    row_count: usize,
    fingerprint: Fingerprint,
}

impl Dataset {
    /// Build a dataset from columns, validating the shape invariants and
    /// computing the fingerprint once.
    ///
    /// # Errors
    /// Returns `DataFormat` if column lengths differ or names repeat.
    pub fn new(columns: Vec<Column>) -> crate::Result<Self> {
        let row_count = columns.first().map_or(0, Column::len);
        for col in &columns {
            if col.len() != row_count {
                return Err(crate::TabLensError::data_format(
                    0,
                    format!(
                        "column '{}' has {} rows, expected {}",
                        col.name,
                        col.len(),
                        row_count
                    ),
                ));
            }
        }
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(crate::TabLensError::data_format(
                    0,
                    format!("duplicate column name '{}'", col.name),
                ));
            }
        }

        let fingerprint = compute_fingerprint(&columns, row_count);
        Ok(Self {
            columns,
            row_count,
            fingerprint,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Fingerprint computed at load time and cached on the value.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Total NULL cells across all columns.
    pub fn missing_count(&self) -> usize {
        self.columns.iter().map(Column::null_count).sum()
    }

    /// Rough in-memory footprint estimate in bytes.
    pub fn memory_estimate(&self) -> usize {
        let mut bytes = 0;
        for col in &self.columns {
            bytes += col.name.len() + std::mem::size_of::<Column>();
            bytes += col.values.len() * std::mem::size_of::<Value>();
            for v in &col.values {
                if let Value::Text(s) = v {
                    bytes += s.len();
                }
            }
        }
        bytes
    }

    /// First `n` rows as row-major values, for data preview.
    pub fn head(&self, n: usize) -> Vec<Vec<Value>> {
        let take = n.min(self.row_count);
        (0..take)
            .map(|row| self.columns.iter().map(|c| c.values[row].clone()).collect())
            .collect()
    }
}

/// Shared immutable snapshot handle.
pub type DatasetRef = Arc<Dataset>;

fn compute_fingerprint(columns: &[Column], row_count: usize) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update((columns.len() as u64).to_le_bytes());
    hasher.update((row_count as u64).to_le_bytes());

    let mut buf = Vec::with_capacity(64);
    for col in columns {
        hasher.update((col.name.len() as u64).to_le_bytes());
        hasher.update(col.name.as_bytes());
        hasher.update([column_type_tag(col.ty)]);
        for value in &col.values {
            buf.clear();
            value.canonical_bytes(&mut buf);
            hasher.update(&buf);
        }
    }

    Fingerprint(hasher.finalize().into())
}

fn column_type_tag(ty: ColumnType) -> u8 {
    match ty {
        ColumnType::Integer => 0,
        ColumnType::Float => 1,
        ColumnType::Boolean => 2,
        ColumnType::Timestamp => 3,
        ColumnType::Text => 4,
        ColumnType::Mixed => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_col(name: &str, values: &[Option<i64>]) -> Column {
        Column::new(
            name,
            ColumnType::Integer,
            values
                .iter()
                .map(|v| v.map_or(Value::Null, Value::Integer))
                .collect(),
        )
    }

    #[test]
    fn test_equal_content_equal_fingerprint() {
        let a = Dataset::new(vec![int_col("id", &[Some(1), Some(2), None])]).unwrap();
        let b = Dataset::new(vec![int_col("id", &[Some(1), Some(2), None])]).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_changed_content_changes_fingerprint() {
        let a = Dataset::new(vec![int_col("id", &[Some(1), Some(2)])]).unwrap();
        let b = Dataset::new(vec![int_col("id", &[Some(1), Some(3)])]).unwrap();
        let c = Dataset::new(vec![int_col("idx", &[Some(1), Some(2)])]).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_ragged_columns_rejected() {
        let result = Dataset::new(vec![
            int_col("a", &[Some(1), Some(2)]),
            int_col("b", &[Some(1)]),
        ]);
        assert!(matches!(
            result,
            Err(crate::TabLensError::DataFormat { .. })
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Dataset::new(vec![int_col("a", &[Some(1)]), int_col("a", &[Some(2)])]);
        assert!(matches!(
            result,
            Err(crate::TabLensError::DataFormat { .. })
        ));
    }

    #[test]
    fn test_head_and_missing_count() {
        let ds = Dataset::new(vec![int_col("id", &[Some(1), None, Some(3)])]).unwrap();
        assert_eq!(ds.missing_count(), 1);
        assert_eq!(ds.head(2).len(), 2);
        assert_eq!(ds.head(10).len(), 3);
        assert_eq!(ds.head(1)[0][0], Value::Integer(1));
    }
}
