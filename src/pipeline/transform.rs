//! Row-level enrichment for the Transform stage
//!
//! Transformers take a row by value and return a new one. Appending goes
//! through `Row::with_column`, which extends cells and index together.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use rustc_hash::FxHashMap;

use crate::comorbidity::WindowScore;
use crate::error::Result;
use crate::model::{CellValue, Quarter, Row};
use crate::pipeline::stage::StageProcessor;

/// Trait for row enrichments
pub trait RowTransformer: Send + Sync {
    /// Produce the enriched row
    fn transform(&self, row: Row) -> Result<Row>;
}

/// Leaves rows unchanged
#[derive(Debug, Clone, Default)]
pub struct IdentityTransformer;

impl RowTransformer for IdentityTransformer {
    fn transform(&self, row: Row) -> Result<Row> {
        Ok(row)
    }
}

/// Appends the subject's pseudonymization hash as a new column
///
/// Subjects missing from the table get a null cell.
#[derive(Debug, Clone)]
pub struct AppendSubjectHash {
    subject_column: String,
    output_column: String,
    hashes: Arc<BTreeMap<String, String>>,
}

impl AppendSubjectHash {
    /// Create a hash lookup transformer
    pub fn new(
        subject_column: impl Into<String>,
        output_column: impl Into<String>,
        hashes: Arc<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            subject_column: subject_column.into(),
            output_column: output_column.into(),
            hashes,
        }
    }
}

impl RowTransformer for AppendSubjectHash {
    fn transform(&self, row: Row) -> Result<Row> {
        let digest = row
            .get_or_err(&self.subject_column)?
            .as_code()
            .and_then(|subject| self.hashes.get(&subject).cloned());
        row.with_column(&self.output_column, CellValue::from(digest))
    }
}

/// Appends the comorbidity score of the window anchored at the row's quarter
///
/// The quarter comes from a date column. Rows without a date, or whose
/// quarter has no window for that subject, get a null cell.
#[derive(Debug, Clone)]
pub struct AppendComorbidityScore {
    subject_column: String,
    date_column: String,
    output_column: String,
    scores: Arc<FxHashMap<String, Vec<WindowScore>>>,
}

impl AppendComorbidityScore {
    /// Create a score lookup transformer
    pub fn new(
        subject_column: impl Into<String>,
        date_column: impl Into<String>,
        output_column: impl Into<String>,
        scores: Arc<FxHashMap<String, Vec<WindowScore>>>,
    ) -> Self {
        Self {
            subject_column: subject_column.into(),
            date_column: date_column.into(),
            output_column: output_column.into(),
            scores,
        }
    }

    fn lookup(&self, subject: &str, quarter: Quarter) -> Option<u32> {
        let windows = self.scores.get(subject)?;
        // windows are contiguous and sorted by start quarter
        windows
            .binary_search_by(|w| w.start.cmp(&quarter))
            .ok()
            .map(|i| windows[i].score)
    }
}

impl RowTransformer for AppendComorbidityScore {
    fn transform(&self, row: Row) -> Result<Row> {
        let subject = row.get_or_err(&self.subject_column)?.as_code();
        let quarter = row
            .get_or_err(&self.date_column)?
            .as_date()
            .map(Quarter::from_date);

        let score = match (subject, quarter) {
            (Some(subject), Some(quarter)) => self.lookup(&subject, quarter),
            _ => None,
        };
        row.with_column(&self.output_column, CellValue::from(score.map(i64::from)))
    }
}

/// Appends a column computed from the row
pub struct AppendColumn<F> {
    column: String,
    compute: F,
}

impl<F> AppendColumn<F>
where
    F: Fn(&Row) -> CellValue + Send + Sync,
{
    /// Create an appending transformer
    pub fn new(column: impl Into<String>, compute: F) -> Self {
        Self {
            column: column.into(),
            compute,
        }
    }
}

impl<F> RowTransformer for AppendColumn<F>
where
    F: Fn(&Row) -> CellValue + Send + Sync,
{
    fn transform(&self, row: Row) -> Result<Row> {
        let value = (self.compute)(&row);
        row.with_column(&self.column, value)
    }
}

impl<F> fmt::Debug for AppendColumn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppendColumn")
            .field("column", &self.column)
            .finish_non_exhaustive()
    }
}

/// Recomputes an existing derived column from the row
pub struct RecomputeColumn<F> {
    column: String,
    compute: F,
}

impl<F> RecomputeColumn<F>
where
    F: Fn(&Row) -> CellValue + Send + Sync,
{
    /// Create a recomputing transformer
    pub fn new(column: impl Into<String>, compute: F) -> Self {
        Self {
            column: column.into(),
            compute,
        }
    }
}

impl<F> RowTransformer for RecomputeColumn<F>
where
    F: Fn(&Row) -> CellValue + Send + Sync,
{
    fn transform(&self, row: Row) -> Result<Row> {
        let value = (self.compute)(&row);
        row.with_replaced(&self.column, value)
    }
}

impl<F> fmt::Debug for RecomputeColumn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecomputeColumn")
            .field("column", &self.column)
            .finish_non_exhaustive()
    }
}

/// Applies transformers in order
#[derive(Default)]
pub struct TransformChain {
    steps: Vec<Arc<dyn RowTransformer>>,
}

impl TransformChain {
    /// Create an empty chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    #[must_use]
    pub fn then(mut self, step: impl RowTransformer + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Number of steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the chain has no steps
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl RowTransformer for TransformChain {
    fn transform(&self, row: Row) -> Result<Row> {
        self.steps.iter().try_fold(row, |row, step| step.transform(row))
    }
}

/// Transform stage processor
pub struct TransformProcessor {
    transformer: Arc<dyn RowTransformer>,
}

impl TransformProcessor {
    /// Wrap a transformer
    #[must_use]
    pub fn new(transformer: Arc<dyn RowTransformer>) -> Self {
        Self { transformer }
    }
}

impl StageProcessor<Row, Row> for TransformProcessor {
    fn process(&self, row: Row) -> BoxFuture<'_, Result<Vec<Row>>> {
        let result = self.transformer.transform(row).map(|row| vec![row]);
        Box::pin(async move { result })
    }
}
