//! A Rust library for extracting periodic registry datasets through a
//! bounded, concurrent stage pipeline, with composite subject hashing and
//! rolling comorbidity scores as lookup inputs.

pub mod aggregate;
pub mod comorbidity;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod query;
pub mod utils;

// Re-export the most common types for easier use
// Core types
pub use config::{AggregationConfig, ComorbidityConfig, PipelineConfig, StageConfig};
pub use error::{PipelineError, Result};
pub use model::{CellValue, ColumnIndex, Quarter, Row, StageItem};

// Query execution
pub use query::{Connection, ConnectionFactory, QueryJob, QuerySession, ResultSet, with_one_retry};

// Stage pipeline
pub use pipeline::{
    FilterProcessor, MemoryWriter, Pipeline, PipelineReport, RowFilter, RowTransformer,
    RowWriter, Stage, StageProcessor, StageReport, TransformChain,
};

// Aggregation and hashing
pub use aggregate::{Aggregation, Aggregator, Category, CategoryFetcher, CompositeRecord};

// Comorbidity scoring
pub use comorbidity::{DiagnosisWeightFact, WindowScore, calculate, calculate_all};

// Utility functions
pub use utils::init_logging;
