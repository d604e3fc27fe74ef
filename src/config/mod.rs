//! Configuration for pipeline stages, aggregation and comorbidity scoring.
//!
//! Values are passed in by the caller; nothing here reads files or the
//! environment.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{PipelineError, Result};

/// Default bounded queue capacity for a stage
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Configuration for a single pipeline stage
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Capacity of the stage's bounded output queue
    pub queue_capacity: usize,
    /// Number of concurrent worker tasks
    pub workers: usize,
    /// Optional deadline for a single worker task
    #[serde(with = "optional_millis")]
    pub task_timeout: Option<Duration>,
}

impl StageConfig {
    /// Create a stage configuration with the given capacity and worker count
    #[must_use]
    pub const fn new(queue_capacity: usize, workers: usize) -> Self {
        Self {
            queue_capacity,
            workers,
            task_timeout: None,
        }
    }

    /// Set a per-task deadline
    #[must_use]
    pub const fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Check that the stage can be allocated
    pub fn validate(&self, stage: &str) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config(format!(
                "stage '{stage}' needs a queue capacity of at least 1"
            )));
        }
        if self.workers == 0 {
            return Err(PipelineError::Config(format!(
                "stage '{stage}' needs at least one worker"
            )));
        }
        Ok(())
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY, num_cpus::get())
    }
}

/// Configuration for the Extract → Filter → Transform pipeline
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Extraction stage (query workers)
    pub extract: StageConfig,
    /// Validation stage
    pub filter: StageConfig,
    /// Enrichment stage
    pub transform: StageConfig,
}

impl PipelineConfig {
    /// Use the same settings for every stage
    #[must_use]
    pub fn uniform(stage: StageConfig) -> Self {
        Self {
            extract: stage.clone(),
            filter: stage.clone(),
            transform: stage,
        }
    }

    /// Validate every stage
    pub fn validate(&self) -> Result<()> {
        self.extract.validate("extract")?;
        self.filter.validate("filter")?;
        self.transform.validate("transform")
    }
}

impl fmt::Display for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline Configuration:")?;
        for (name, stage) in [
            ("Extract", &self.extract),
            ("Filter", &self.filter),
            ("Transform", &self.transform),
        ] {
            write!(
                f,
                "  {name}: capacity {}, workers {}",
                stage.queue_capacity, stage.workers
            )?;
            if let Some(timeout) = stage.task_timeout {
                write!(f, ", task timeout {timeout:?}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Configuration for the composite-hash aggregation run
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Maximum number of concurrent category × year fetches
    pub workers: usize,
    /// Deadline for one fetch attempt
    #[serde(with = "optional_millis")]
    pub fetch_timeout: Option<Duration>,
    /// Whether to draw a progress bar for the fan-out
    pub show_progress: bool,
}

impl AggregationConfig {
    /// Check that the worker pool can be sized
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::Config(
                "aggregation needs at least one worker".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            fetch_timeout: Some(Duration::from_secs(600)),
            show_progress: true,
        }
    }
}

impl fmt::Display for AggregationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Aggregation Configuration:")?;
        writeln!(f, "  Workers: {}", self.workers)?;
        if let Some(timeout) = self.fetch_timeout {
            writeln!(f, "  Fetch Timeout: {timeout:?}")?;
        }
        writeln!(f, "  Show Progress: {}", self.show_progress)
    }
}

/// Analysis horizon for comorbidity scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ComorbidityConfig {
    /// First year of the horizon (inclusive)
    pub min_year: i32,
    /// Last year of the horizon (inclusive)
    pub max_year: i32,
}

impl ComorbidityConfig {
    /// Create a horizon configuration
    #[must_use]
    pub const fn new(min_year: i32, max_year: i32) -> Self {
        Self { min_year, max_year }
    }

    /// Check that the horizon is not inverted
    pub fn validate(&self) -> Result<()> {
        if self.min_year > self.max_year {
            return Err(PipelineError::Config(format!(
                "comorbidity horizon is inverted: {} > {}",
                self.min_year, self.max_year
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ComorbidityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Comorbidity Configuration:")?;
        writeln!(f, "  Horizon: {}Q1 to {}Q4", self.min_year, self.max_year)
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
