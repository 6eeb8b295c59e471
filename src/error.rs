//! Error types for the Retainless analytics pipeline
//!
//! This module provides structured error definitions using thiserror, with
//! anyhow accepted at the edges for error propagation.

use thiserror::Error;

/// Main error type for Retainless operations
#[derive(Error, Debug)]
pub enum RetainlessError {
    /// Period boundaries are out of order or badly spaced
    #[error("Chronology error: {0}")]
    Chronology(String),

    /// A log query ended in a non-complete terminal state
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A log query matched too many records to be trusted
    #[error("Query too close, {matched}, to limit ('{start}' to '{end}'). Reduce 'log_max_duration_secs' for logs")]
    VolumeExceeded {
        matched: u64,
        start: String,
        end: String,
    },

    /// No queryable time window remained after clamping
    #[error("Empty time range: {0}")]
    EmptyTimeRange(String),

    /// Report range does not cover any persisted period
    #[error("Range does not include any users: {0}")]
    EmptyReportRange(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite driver error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Secret missing or unusable
    #[error("Secret error: {0}")]
    Secret(String),

    /// Access log line could not be parsed
    #[error("Log parse error: {0}")]
    LogParse(String),

    /// Notification delivery failed
    #[error("Notification error: {0}")]
    Notify(String),

    /// A persistence batch failed; earlier batches stay written
    #[error("Batch write failed after {written} of {total} rows: {reason}")]
    BatchWrite {
        written: usize,
        total: usize,
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Timestamp parse error
    #[error("Timestamp error: {0}")]
    Timestamp(#[from] chrono::ParseError),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Retainless operations
pub type Result<T> = std::result::Result<T, RetainlessError>;

/// Convert anyhow::Error to RetainlessError
impl From<anyhow::Error> for RetainlessError {
    fn from(err: anyhow::Error) -> Self {
        RetainlessError::Other(err.to_string())
    }
}

impl RetainlessError {
    /// Whether this error aborts a period run before anything is written
    pub fn is_chronology(&self) -> bool {
        matches!(self, RetainlessError::Chronology(_))
    }
}
