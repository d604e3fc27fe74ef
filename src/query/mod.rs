//! Narrow interface to the warehouse: "run this query, get rows"
//!
//! Connection management itself lives outside this crate. A caller plugs in
//! a `ConnectionFactory`; `QuerySession` adds pooling, validity checks,
//! per-query deadlines and the retry-once policy on top of it.

pub mod retry;
pub mod session;

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::model::{CellValue, ColumnIndex, Row};

pub use retry::with_one_retry;
pub use session::QuerySession;

/// Raw tuples returned by one query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column names, in order
    pub columns: Vec<String>,
    /// One vector of cells per database row
    pub rows: Vec<Vec<CellValue>>,
}

impl ResultSet {
    /// Create a result set
    #[must_use]
    pub const fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self { columns, rows }
    }

    /// Number of tuples
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the query returned nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Turn the tuples into rows labelled with their source
    ///
    /// All rows share one column index. Tuples whose width disagrees with
    /// the header are skipped with a warning.
    pub fn into_rows(self, source_db: &str, source_table: &str) -> Result<Vec<Row>> {
        let columns = Arc::new(ColumnIndex::new(&self.columns)?);
        let db: Arc<str> = Arc::from(source_db);
        let table: Arc<str> = Arc::from(source_table);

        let mut rows = Vec::with_capacity(self.rows.len());
        for (index, cells) in self.rows.into_iter().enumerate() {
            match Row::new(db.clone(), table.clone(), columns.clone(), cells) {
                Ok(row) => rows.push(row.at_tuple(index)),
                Err(e) => log::warn!(
                    "Skipping malformed tuple {index} from {source_db}.{source_table}: {e}"
                ),
            }
        }
        Ok(rows)
    }
}

/// An open warehouse connection
pub trait Connection: Send {
    /// Cheap liveness check performed before a pooled connection is reused
    fn is_valid(&self) -> bool;

    /// Run one ready-to-run query
    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, Result<ResultSet>>;
}

/// Opens warehouse connections
pub trait ConnectionFactory: Send + Sync {
    /// Label used in logs (usually the logical database name)
    fn label(&self) -> &str;

    /// Open a new connection
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Connection>>>;
}

/// A ready-to-run query plus the metadata attached to its rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryJob {
    /// Opaque query text
    pub query: String,
    /// Logical database name
    pub db: String,
    /// Table name
    pub table: String,
    /// Time-slice label (e.g. a year)
    pub time_slice: String,
    /// Dataset label
    pub dataset: String,
}

impl QueryJob {
    /// Create a job
    pub fn new(
        query: impl Into<String>,
        db: impl Into<String>,
        table: impl Into<String>,
        time_slice: impl Into<String>,
        dataset: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            db: db.into(),
            table: table.into(),
            time_slice: time_slice.into(),
            dataset: dataset.into(),
        }
    }

    /// Label identifying this job in logs
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}/{}.{}/{}", self.dataset, self.db, self.table, self.time_slice)
    }
}

impl fmt::Display for QueryJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
