//! Core data types shared by the pipeline, aggregation and scoring.

pub mod cell;
pub mod quarter;
pub mod row;

pub use cell::CellValue;
pub use quarter::Quarter;
pub use row::{ColumnIndex, Row};

/// An item travelling through a stage queue
///
/// End of stream is its own variant, so it can never be mistaken for data.
#[derive(Debug, Clone, PartialEq)]
pub enum StageItem<T> {
    /// A data item
    Item(T),
    /// No more items will follow
    EndOfStream,
}

impl<T> StageItem<T> {
    /// Whether this is the end-of-stream marker
    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    /// Take the data item, if any
    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Item(item) => Some(item),
            Self::EndOfStream => None,
        }
    }
}
