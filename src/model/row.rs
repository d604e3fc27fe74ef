//! Extracted rows and their case-insensitive column index
//!
//! A `Row` is logically immutable: every transformation returns a new row.
//! Rows from one result set share a single `ColumnIndex` until a
//! transformer appends a column, at which point the index is copied.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{PipelineError, Result};
use crate::model::CellValue;

/// Ordered column names plus a case-insensitive name → position map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnIndex {
    names: Vec<String>,
    positions: FxHashMap<String, usize>,
}

impl ColumnIndex {
    /// Build an index from column names
    ///
    /// # Errors
    /// Returns an error if two names collide case-insensitively
    pub fn new<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut index = Self::default();
        for name in names {
            index.push(name.as_ref())?;
        }
        Ok(index)
    }

    fn push(&mut self, name: &str) -> Result<usize> {
        let key = name.to_lowercase();
        if self.positions.contains_key(&key) {
            return Err(PipelineError::DuplicateColumn(name.to_string()));
        }
        let position = self.names.len();
        self.names.push(name.to_string());
        self.positions.insert(key, position);
        Ok(position)
    }

    /// Position of a column, ignoring case
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(&name.to_lowercase()).copied()
    }

    /// Column names in order
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of columns
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the index has no columns
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One extracted record
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    source_db: Arc<str>,
    source_table: Arc<str>,
    cells: Vec<CellValue>,
    columns: Arc<ColumnIndex>,
    tuple: Option<usize>,
}

impl Row {
    /// Create a row, checking that cells and columns line up
    pub fn new(
        source_db: impl Into<Arc<str>>,
        source_table: impl Into<Arc<str>>,
        columns: Arc<ColumnIndex>,
        cells: Vec<CellValue>,
    ) -> Result<Self> {
        if cells.len() != columns.len() {
            return Err(PipelineError::ShapeMismatch {
                cells: cells.len(),
                columns: columns.len(),
            });
        }
        Ok(Self {
            source_db: source_db.into(),
            source_table: source_table.into(),
            cells,
            columns,
            tuple: None,
        })
    }

    /// Convenience constructor from `(name, value)` pairs
    pub fn from_pairs<S: AsRef<str>>(
        source_db: &str,
        source_table: &str,
        pairs: Vec<(S, CellValue)>,
    ) -> Result<Self> {
        let names: Vec<&str> = pairs.iter().map(|(name, _)| name.as_ref()).collect();
        let columns = Arc::new(ColumnIndex::new(&names)?);
        let cells = pairs.into_iter().map(|(_, value)| value).collect();
        Self::new(source_db, source_table, columns, cells)
    }

    /// Source database label
    #[must_use]
    pub fn source_db(&self) -> &str {
        &self.source_db
    }

    /// Source table label
    #[must_use]
    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    /// Tag the row with its position in the source result set
    #[must_use]
    pub const fn at_tuple(mut self, index: usize) -> Self {
        self.tuple = Some(index);
        self
    }

    /// Position in the source result set, if known
    #[must_use]
    pub const fn tuple_index(&self) -> Option<usize> {
        self.tuple
    }

    /// `db.table[tuple N]` label used in logs; the position is omitted for
    /// rows built outside a result set
    #[must_use]
    pub fn describe(&self) -> String {
        match self.tuple {
            Some(index) => format!("{}.{}[tuple {index}]", self.source_db, self.source_table),
            None => format!("{}.{}", self.source_db, self.source_table),
        }
    }

    /// Cells in column order
    #[must_use]
    pub fn cells(&self) -> &[CellValue] {
        &self.cells
    }

    /// The column index
    #[must_use]
    pub fn columns(&self) -> &ColumnIndex {
        &self.columns
    }

    /// Number of cells
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the row has no cells
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether the row carries a column, ignoring case
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.position(name).is_some()
    }

    /// Look up a cell by column name, ignoring case
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.columns.position(name).map(|i| &self.cells[i])
    }

    /// Look up a cell by column name, failing if the column is missing
    pub fn get_or_err(&self, name: &str) -> Result<&CellValue> {
        self.get(name)
            .ok_or_else(|| PipelineError::ColumnNotFound(name.to_string()))
    }

    /// Return a new row with one more column
    ///
    /// Cells and index are extended together. A name already present
    /// (ignoring case) is rejected.
    pub fn with_column(mut self, name: &str, value: CellValue) -> Result<Self> {
        Arc::make_mut(&mut self.columns).push(name)?;
        self.cells.push(value);
        Ok(self)
    }

    /// Return a new row with an existing column's value replaced
    pub fn with_replaced(mut self, name: &str, value: CellValue) -> Result<Self> {
        let position = self
            .columns
            .position(name)
            .ok_or_else(|| PipelineError::ColumnNotFound(name.to_string()))?;
        self.cells[position] = value;
        Ok(self)
    }
}
