//! Extract stage: turns query jobs into rows

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{PipelineError, Result};
use crate::model::Row;
use crate::pipeline::stage::StageProcessor;
use crate::query::{QueryJob, QuerySession};

/// Runs each job through the session with the retry-once policy
///
/// A job that still fails after its retry produces no rows; the stage logs
/// it with the job label so the gap can be traced.
#[derive(Debug)]
pub struct ExtractProcessor {
    session: Arc<QuerySession>,
}

impl ExtractProcessor {
    /// Create an extractor over a query session
    #[must_use]
    pub const fn new(session: Arc<QuerySession>) -> Self {
        Self { session }
    }

    async fn extract(&self, job: QueryJob) -> Result<Vec<Row>> {
        let label = job.label();
        let result = self
            .session
            .execute_with_retry(&label, &job.query)
            .await
            .map_err(|e| PipelineError::query(&label, e))?;

        log::debug!("{label} returned {} rows", result.len());
        result.into_rows(&job.db, &job.table)
    }
}

impl StageProcessor<QueryJob, Row> for ExtractProcessor {
    fn process(&self, job: QueryJob) -> BoxFuture<'_, Result<Vec<Row>>> {
        Box::pin(self.extract(job))
    }
}
