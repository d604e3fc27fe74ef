//! Shared utilities

pub mod logging;

pub use logging::{init_logging, log_operation_complete, log_operation_start, log_warning};
