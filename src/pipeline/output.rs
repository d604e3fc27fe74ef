//! Output sink: hands finished rows to an external writer

use crate::error::{PipelineError, Result};
use crate::model::{Row, StageItem};
use crate::pipeline::queue::QueueReceiver;

/// Destination for finished rows (CSV, report, table, ...)
pub trait RowWriter: Send {
    /// Write one row
    fn write(&mut self, row: &Row) -> Result<()>;

    /// Called once after the last row
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects rows in memory
#[derive(Debug, Default)]
pub struct MemoryWriter {
    rows: Vec<Row>,
}

impl MemoryWriter {
    /// Create an empty writer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows written so far
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Take the collected rows
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl RowWriter for MemoryWriter {
    fn write(&mut self, row: &Row) -> Result<()> {
        self.rows.push(row.clone());
        Ok(())
    }
}

/// Rows written and rows the writer rejected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputReport {
    /// Rows accepted by the writer
    pub written: usize,
    /// Rows the writer failed on
    pub failed: usize,
}

/// Drain `input` into `writer` until end of stream
///
/// Individual write failures are logged and counted; a queue that closes
/// without end of stream means an upstream stage died and is an error.
pub async fn drain_into<W: RowWriter + ?Sized>(
    mut input: QueueReceiver<Row>,
    writer: &mut W,
) -> Result<OutputReport> {
    let mut report = OutputReport::default();
    loop {
        match input.recv().await {
            Some(StageItem::Item(row)) => match writer.write(&row) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    log::error!("Failed to write row from {}: {e}", row.describe());
                    report.failed += 1;
                }
            },
            Some(StageItem::EndOfStream) => break,
            None => {
                return Err(PipelineError::ChannelClosed(
                    "output queue closed before end of stream".to_string(),
                ));
            }
        }
    }
    writer.finish()?;
    Ok(report)
}
