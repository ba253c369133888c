use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChartError {
    #[error("rail segment list is empty")]
    EmptySegments,

    #[error("rail segments out of ascending time order at index {index}")]
    UnsortedSegments { index: usize },

    #[error("rail segments share one time slot at index {index}")]
    DuplicateSegmentTime { index: usize },
}
