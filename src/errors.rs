//! Error types for TabLens

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TabLensError>;

#[derive(Error, Debug)]
pub enum TabLensError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed source data at line {line}: {detail}")]
    DataFormat { line: usize, detail: String },

    #[error("Query syntax error at byte {position} near '{token}': {detail}")]
    QuerySyntax {
        position: usize,
        token: String,
        detail: String,
    },

    #[error("Unknown column in query: {column}")]
    QueryBinding { column: String },

    #[error("Computation failure: {0}")]
    Computation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No dataset has been loaded")]
    NoDataset,

    #[error("Unknown source: {0}")]
    UnknownSource(String),
}

impl TabLensError {
    /// Convenience constructor for malformed-input reports.
    pub fn data_format(line: usize, detail: impl Into<String>) -> Self {
        TabLensError::DataFormat {
            line,
            detail: detail.into(),
        }
    }
}

impl From<tokio::task::JoinError> for TabLensError {
    fn from(err: tokio::task::JoinError) -> Self {
        TabLensError::Computation(err.to_string())
    }
}
