//! Data source ingestion and per-column type inference

use crate::dataset::{Column, ColumnType, Dataset, Value};
use crate::{Result, TabLensError};
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use std::path::PathBuf;
use tracing::debug;

/// Number of leading non-null cells used for the inference prefix. The full
/// scan must agree with the prefix (modulo integer-to-float widening) or the
/// column degrades to `Mixed`.
const INFER_PREFIX_ROWS: usize = 256;

/// Timestamp layouts accepted during inference, tried in order.
static TIMESTAMP_FORMATS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
    ]
});

static DATE_FORMATS: Lazy<Vec<&'static str>> = Lazy::new(|| vec!["%Y-%m-%d", "%m/%d/%Y"]);

/// Raw tabular input the engine can ingest.
#[derive(Debug, Clone)]
pub enum DataSource {
    /// Delimited text file on disk.
    DelimitedFile {
        path: PathBuf,
        delimiter: u8,
        has_headers: bool,
    },
    /// Delimited text already in memory (e.g. an upload buffer).
    DelimitedBytes {
        bytes: Vec<u8>,
        delimiter: u8,
        has_headers: bool,
    },
    /// In-memory tabular handle: one JSON object per row. Values keep their
    /// JSON types; no string re-inference is applied.
    Memory { rows: Vec<serde_json::Value> },
}

impl DataSource {
    /// Create a comma-delimited file source with a header row.
    pub fn csv(path: impl Into<PathBuf>) -> Self {
        DataSource::DelimitedFile {
            path: path.into(),
            delimiter: b',',
            has_headers: true,
        }
    }

    pub fn delimited_file(path: impl Into<PathBuf>, delimiter: u8, has_headers: bool) -> Self {
        DataSource::DelimitedFile {
            path: path.into(),
            delimiter,
            has_headers,
        }
    }

    pub fn delimited_bytes(bytes: Vec<u8>, delimiter: u8, has_headers: bool) -> Self {
        DataSource::DelimitedBytes {
            bytes,
            delimiter,
            has_headers,
        }
    }

    pub fn memory(rows: Vec<serde_json::Value>) -> Self {
        DataSource::Memory { rows }
    }

    /// Ingest the source into an immutable dataset. All-or-nothing: any
    /// format error surfaces before a dataset value exists.
    pub async fn load(&self) -> Result<Dataset> {
        match self {
            DataSource::DelimitedFile {
                path,
                delimiter,
                has_headers,
            } => {
                let (path, delimiter, has_headers) = (path.clone(), *delimiter, *has_headers);
                // The csv reader is blocking; keep it off the async workers.
                tokio::task::spawn_blocking(move || {
                    let file = std::fs::File::open(&path)?;
                    read_delimited(file, delimiter, has_headers)
                })
                .await?
            }
            DataSource::DelimitedBytes {
                bytes,
                delimiter,
                has_headers,
            } => read_delimited(bytes.as_slice(), *delimiter, *has_headers),
            DataSource::Memory { rows } => read_memory(rows),
        }
    }
}

/// Parse delimited text into typed columns.
fn read_delimited<R: std::io::Read>(input: R, delimiter: u8, has_headers: bool) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .flexible(true)
        .from_reader(input);

    let mut names: Vec<String> = if has_headers {
        reader.headers()?.iter().map(str::to_owned).collect()
    } else {
        Vec::new()
    };

    // Column-major raw cells; None marks an empty field.
    let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
    for (row_idx, record) in reader.records().enumerate() {
        let record = record?;
        let line = record
            .position()
            .map_or(row_idx + 1, |p| p.line() as usize);

        if names.is_empty() {
            names = (0..record.len()).map(|i| format!("column_{}", i)).collect();
            raw = vec![Vec::new(); names.len()];
        }
        if record.len() != names.len() {
            return Err(TabLensError::data_format(
                line,
                format!("expected {} fields, found {}", names.len(), record.len()),
            ));
        }
        for (col, field) in record.iter().enumerate() {
            let trimmed = field.trim();
            raw[col].push(if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            });
        }
    }

    let mut columns = Vec::with_capacity(names.len());
    for (name, cells) in names.into_iter().zip(raw) {
        columns.push(infer_column(name, cells)?);
    }
    Dataset::new(columns)
}

/// Ingest in-memory JSON rows. Column order is the order of first
/// appearance across records; missing keys become NULL.
fn read_memory(rows: &[serde_json::Value]) -> Result<Dataset> {
    let mut names: Vec<String> = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let obj = row.as_object().ok_or_else(|| {
            TabLensError::data_format(i + 1, "in-memory row is not a JSON object")
        })?;
        for key in obj.keys() {
            if !names.iter().any(|n| n == key) {
                names.push(key.clone());
            }
        }
    }

    let mut columns = Vec::with_capacity(names.len());
    for name in names {
        let cells: Vec<Value> = rows
            .iter()
            .map(|row| json_to_value(row.get(&name).unwrap_or(&serde_json::Value::Null)))
            .collect();
        let ty = unify_memory_type(&cells);
        let values = if ty == ColumnType::Mixed {
            cells
                .into_iter()
                .map(|v| match v {
                    Value::Null => Value::Null,
                    other => Value::Text(other.to_string()),
                })
                .collect()
        } else if ty == ColumnType::Float {
            // Widen stray integers so the column is uniformly typed.
            cells
                .into_iter()
                .map(|v| match v {
                    Value::Integer(i) => Value::Float(i as f64),
                    other => other,
                })
                .collect()
        } else {
            cells
        };
        columns.push(Column::new(name, ty, values));
    }
    Dataset::new(columns)
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

fn unify_memory_type(cells: &[Value]) -> ColumnType {
    let mut ty: Option<ColumnType> = None;
    for cell in cells {
        let cell_ty = match cell {
            Value::Null => continue,
            Value::Integer(_) => ColumnType::Integer,
            Value::Float(_) => ColumnType::Float,
            Value::Boolean(_) => ColumnType::Boolean,
            Value::Timestamp(_) => ColumnType::Timestamp,
            Value::Text(_) => ColumnType::Text,
        };
        ty = Some(match ty {
            None => cell_ty,
            Some(t) => unify(t, cell_ty),
        });
        if ty == Some(ColumnType::Mixed) {
            break;
        }
    }
    ty.unwrap_or(ColumnType::Text)
}

/// Narrowest type a raw cell parses as. Ladder: integer, float, boolean,
/// timestamp, text.
fn classify(cell: &str) -> ColumnType {
    if cell.parse::<i64>().is_ok() {
        ColumnType::Integer
    } else if cell.parse::<f64>().is_ok() {
        ColumnType::Float
    } else if cell.eq_ignore_ascii_case("true") || cell.eq_ignore_ascii_case("false") {
        ColumnType::Boolean
    } else if parse_timestamp(cell).is_some() {
        ColumnType::Timestamp
    } else {
        ColumnType::Text
    }
}

/// Type lattice: identical types keep, integer and float widen to float,
/// anything else is a disagreement.
fn unify(a: ColumnType, b: ColumnType) -> ColumnType {
    if a == b {
        a
    } else if a.is_numeric() && b.is_numeric() {
        ColumnType::Float
    } else {
        ColumnType::Mixed
    }
}

fn unify_over<'a, I: Iterator<Item = &'a str>>(cells: I) -> Option<ColumnType> {
    let mut ty: Option<ColumnType> = None;
    for cell in cells {
        let cell_ty = classify(cell);
        ty = Some(match ty {
            None => cell_ty,
            Some(t) => unify(t, cell_ty),
        });
        if ty == Some(ColumnType::Mixed) {
            break;
        }
    }
    ty
}

/// Infer a column type from its raw cells and materialise typed values.
fn infer_column(name: String, cells: Vec<Option<String>>) -> Result<Column> {
    let non_null = || cells.iter().filter_map(|c| c.as_deref());

    let prefix_ty = unify_over(non_null().take(INFER_PREFIX_ROWS));
    let full_ty = unify_over(non_null());

    // Numeric widening between the prefix and the tail is accepted; any
    // other disagreement resolves to Mixed.
    let ty = match (prefix_ty, full_ty) {
        (None, _) | (_, None) => ColumnType::Text, // all-null column
        (Some(p), Some(f)) => unify(p, f),
    };
    debug!(column = %name, ?ty, "inferred column type");

    let values = cells
        .into_iter()
        .enumerate()
        .map(|(row, cell)| match cell {
            None => Ok(Value::Null),
            Some(raw) => parse_as(ty, &raw).ok_or_else(|| {
                TabLensError::data_format(
                    row + 1,
                    format!("column '{}': cannot parse '{}' as {:?}", name, raw, ty),
                )
            }),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Column::new(name, ty, values))
}

fn parse_as(ty: ColumnType, cell: &str) -> Option<Value> {
    match ty {
        ColumnType::Integer => cell.parse::<i64>().ok().map(Value::Integer),
        ColumnType::Float => cell.parse::<f64>().ok().map(Value::Float),
        ColumnType::Boolean => {
            if cell.eq_ignore_ascii_case("true") {
                Some(Value::Boolean(true))
            } else if cell.eq_ignore_ascii_case("false") {
                Some(Value::Boolean(false))
            } else {
                None
            }
        }
        ColumnType::Timestamp => parse_timestamp(cell).map(Value::Timestamp),
        ColumnType::Text | ColumnType::Mixed => Some(Value::Text(cell.to_owned())),
    }
}

fn parse_timestamp(cell: &str) -> Option<NaiveDateTime> {
    for fmt in TIMESTAMP_FORMATS.iter() {
        if let Ok(ts) = NaiveDateTime::parse_from_str(cell, fmt) {
            return Some(ts);
        }
    }
    for fmt in DATE_FORMATS.iter() {
        if let Ok(date) = NaiveDate::parse_from_str(cell, fmt) {
            return Some(date.and_hms_opt(0, 0, 0)?);
        }
    }
    None
}
