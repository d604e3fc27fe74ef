//! Bounded, concurrent Extract → Filter → Transform → Output pipeline
//!
//! Each stage owns its own bounded queue and worker pool. The job feeder
//! sends every query job and then one end-of-stream marker; every stage
//! forwards that marker only after its in-flight work has drained, so the
//! output sink sees it exactly once and last.

pub mod extract;
pub mod filter;
pub mod output;
pub mod queue;
pub mod stage;
pub mod transform;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::model::Row;
use crate::query::{QueryJob, QuerySession};
use crate::utils::logging::{log_operation_complete, log_operation_start};

pub use extract::ExtractProcessor;
pub use filter::{
    AndFilter, FilterProcessor, IncludeAllFilter, NotNullFilter, RequiredColumnsFilter, RowFilter,
};
pub use output::{MemoryWriter, OutputReport, RowWriter, drain_into};
pub use queue::{QueueReceiver, QueueSender, bounded};
pub use stage::{FnProcessor, Stage, StageDriver, StageProcessor, StageReport};
pub use transform::{
    AppendColumn, AppendComorbidityScore, AppendSubjectHash, IdentityTransformer,
    RecomputeColumn, RowTransformer, TransformChain, TransformProcessor,
};

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Per-stage counts in pipeline order
    pub stages: Vec<StageReport>,
    /// Rows handed to the writer
    pub output: OutputReport,
}

impl PipelineReport {
    /// Items dropped anywhere in the pipeline
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.stages.iter().map(|s| s.dropped).sum::<usize>() + self.output.failed
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline Report:")?;
        for stage in &self.stages {
            writeln!(f, "  {stage}")?;
        }
        writeln!(
            f,
            "  output: written {}, failed {}",
            self.output.written, self.output.failed
        )
    }
}

/// The fixed linear Extract → Filter → Transform → Output composition
pub struct Pipeline {
    config: PipelineConfig,
    session: Arc<QuerySession>,
    filter: Arc<dyn RowFilter>,
    transformer: Arc<dyn RowTransformer>,
}

impl Pipeline {
    /// Create a pipeline, validating every stage's configuration
    pub fn new(
        config: PipelineConfig,
        session: Arc<QuerySession>,
        filter: Arc<dyn RowFilter>,
        transformer: Arc<dyn RowTransformer>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            session,
            filter,
            transformer,
        })
    }

    /// Run every job through the pipeline into `writer`
    ///
    /// # Errors
    /// Fails on fatal setup errors, or when a stage dies without
    /// forwarding end of stream. Failed queries and rejected rows are
    /// contained, logged and reported as drops.
    pub async fn run<W: RowWriter + ?Sized>(
        &self,
        jobs: Vec<QueryJob>,
        writer: &mut W,
    ) -> Result<PipelineReport> {
        let start = Instant::now();
        let job_count = jobs.len();
        log_operation_start("Pipeline run with jobs:", &job_count.to_string());
        log::debug!("{}", self.config);

        let (job_tx, job_rx) = bounded::<QueryJob>(self.config.extract.queue_capacity)?;

        let extractor: Arc<dyn StageProcessor<QueryJob, Row>> =
            Arc::new(ExtractProcessor::new(self.session.clone()));
        let validator: Arc<dyn StageProcessor<Row, Row>> =
            Arc::new(FilterProcessor::new(self.filter.clone()));
        let enricher: Arc<dyn StageProcessor<Row, Row>> =
            Arc::new(TransformProcessor::new(self.transformer.clone()));

        let extract = Stage::configure("extract", self.config.extract.clone(), extractor)?;
        let filter = Stage::configure("filter", self.config.filter.clone(), validator)?;
        let transform = Stage::configure("transform", self.config.transform.clone(), enricher)?;

        let (extracted, extract_driver) = extract.start(job_rx)?;
        let (filtered, filter_driver) = filter.start(extracted)?;
        let (transformed, transform_driver) = transform.start(filtered)?;

        // The extract stage only forwards end of stream once every query it
        // dispatched has completed.
        let feeder = tokio::spawn(async move {
            for job in jobs {
                let label = job.label();
                if let Err(e) = job_tx.send(job).await {
                    log::error!("Could not enqueue job {label}: {e}");
                    return;
                }
            }
            if let Err(e) = job_tx.send_end().await {
                log::error!("Could not enqueue end of jobs: {e}");
            }
        });

        let output = drain_into(transformed, writer).await;

        let mut stages = Vec::with_capacity(3);
        for driver in [extract_driver, filter_driver, transform_driver] {
            stages.push(driver.join().await?);
        }
        if let Err(e) = feeder.await {
            log::error!("Job feeder failed: {e}");
        }

        let report = PipelineReport {
            stages,
            output: output?,
        };
        log_operation_complete(
            "wrote",
            "pipeline",
            report.output.written,
            Some(start.elapsed()),
        );
        Ok(report)
    }
}
