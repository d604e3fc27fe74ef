//! Error handling for the extraction pipeline.
//!
//! Failures fall into two groups: contained failures (one query slice, one
//! row) that are logged and skipped, and fatal failures (configuration,
//! resource allocation) that stop a run before it starts.

use std::time::Duration;

use thiserror::Error;

/// Specialized error type for extraction, aggregation and scoring
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration values (queue capacity, worker counts, horizon)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A queue or worker pool could not be set up
    #[error("Resource error: {0}")]
    Resource(String),

    /// A query failed after being issued
    #[error("Query error for {label}: {message}")]
    Query { label: String, message: String },

    /// A connection could not be opened or was found broken
    #[error("Connection error: {0}")]
    Connection(String),

    /// A query or worker task exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// A row failed structural validation
    #[error("Structural row error in {row}: {message}")]
    StructuralRow { row: String, message: String },

    /// A column was looked up that the row does not carry
    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    /// A transformer tried to append a column that already exists
    #[error("Column '{0}' already exists")]
    DuplicateColumn(String),

    /// Cells and column index disagree in length
    #[error("Row has {cells} cells but {columns} columns")]
    ShapeMismatch { cells: usize, columns: usize },

    /// Quarter outside 1..=4 or an unparsable quarter label
    #[error("Invalid quarter: {0}")]
    InvalidQuarter(String),

    /// A downstream queue was closed while still being written to
    #[error("Queue closed: {0}")]
    ChannelClosed(String),

    /// Serialization of a persisted artifact failed
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything else, usually carrying `anyhow` context
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Build a query error for a labelled query slice
    pub fn query(label: impl Into<String>, message: impl ToString) -> Self {
        Self::Query {
            label: label.into(),
            message: message.to_string(),
        }
    }

    /// Build a structural row error
    pub fn structural(row: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StructuralRow {
            row: row.into(),
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole run rather than one item
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Resource(_))
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
