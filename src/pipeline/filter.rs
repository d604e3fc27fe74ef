//! Row validation for the Filter stage
//!
//! A filter either accepts a row or explains why it is structurally
//! unusable. Rejected rows are dropped by the stage and logged; the
//! pipeline keeps going.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{PipelineError, Result};
use crate::model::Row;
use crate::pipeline::stage::StageProcessor;

/// Trait for objects that validate rows
pub trait RowFilter: std::fmt::Debug + Send + Sync {
    /// Accept the row, or return a structural row error
    fn check(&self, row: &Row) -> Result<()>;

    /// Returns the set of column names required by this filter
    fn required_columns(&self) -> HashSet<String>;
}

/// A filter that accepts every row
#[derive(Debug, Clone, Default)]
pub struct IncludeAllFilter;

impl RowFilter for IncludeAllFilter {
    fn check(&self, _row: &Row) -> Result<()> {
        Ok(())
    }

    fn required_columns(&self) -> HashSet<String> {
        HashSet::new()
    }
}

/// Rejects rows that lack any of the expected columns
#[derive(Debug, Clone)]
pub struct RequiredColumnsFilter {
    columns: Vec<String>,
}

impl RequiredColumnsFilter {
    /// Create a filter requiring the given columns
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

impl RowFilter for RequiredColumnsFilter {
    fn check(&self, row: &Row) -> Result<()> {
        let missing: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| !row.has_column(c))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::structural(
                row.describe(),
                format!("missing column(s) {}", missing.join(", ")),
            ))
        }
    }

    fn required_columns(&self) -> HashSet<String> {
        self.columns.iter().cloned().collect()
    }
}

/// Rejects rows where a column is missing or null
#[derive(Debug, Clone)]
pub struct NotNullFilter {
    column: String,
}

impl NotNullFilter {
    /// Create a filter for one column
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl RowFilter for NotNullFilter {
    fn check(&self, row: &Row) -> Result<()> {
        match row.get(&self.column) {
            None => Err(PipelineError::structural(
                row.describe(),
                format!("missing column {}", self.column),
            )),
            Some(value) if value.is_null() => Err(PipelineError::structural(
                row.describe(),
                format!("column {} is null", self.column),
            )),
            Some(_) => Ok(()),
        }
    }

    fn required_columns(&self) -> HashSet<String> {
        HashSet::from([self.column.clone()])
    }
}

/// A filter that combines multiple filters with a logical AND
#[derive(Debug, Clone)]
pub struct AndFilter {
    filters: Vec<Arc<dyn RowFilter>>,
}

impl AndFilter {
    /// Create a new AND filter
    #[must_use]
    pub fn new(filters: Vec<Arc<dyn RowFilter>>) -> Self {
        Self { filters }
    }
}

impl RowFilter for AndFilter {
    fn check(&self, row: &Row) -> Result<()> {
        self.filters.iter().try_for_each(|f| f.check(row))
    }

    fn required_columns(&self) -> HashSet<String> {
        let mut columns = HashSet::new();
        for filter in &self.filters {
            columns.extend(filter.required_columns());
        }
        columns
    }
}

/// Filter stage processor: forwards accepted rows, fails on rejected ones
#[derive(Debug)]
pub struct FilterProcessor {
    filter: Arc<dyn RowFilter>,
}

impl FilterProcessor {
    /// Wrap a row filter
    #[must_use]
    pub fn new(filter: Arc<dyn RowFilter>) -> Self {
        Self { filter }
    }
}

impl StageProcessor<Row, Row> for FilterProcessor {
    fn process(&self, row: Row) -> BoxFuture<'_, Result<Vec<Row>>> {
        let result = self.filter.check(&row).map(|()| vec![row]);
        Box::pin(async move { result })
    }
}
