//! Error types for the aggregation queue.

use thiserror::Error;

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors that can occur in the aggregation queue.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Capacity was zero or larger than the queue can track.
    #[error("invalid queue capacity: {0}")]
    InvalidCapacity(usize),

    /// The queue was closed before the event could be buffered.
    #[error("push on closed queue")]
    Closed,

    /// The queue is at capacity (non-blocking push only).
    #[error("queue is full (capacity {0})")]
    Full(usize),
}
