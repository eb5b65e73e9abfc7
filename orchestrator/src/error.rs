//! Error types for the orchestrator.

use thiserror::Error;

use crate::orchestrator::OrchestratorState;

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur while orchestrating sources.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The aggregation queue could not be created.
    #[error("queue error: {0}")]
    Queue(#[from] watchpool_queue::QueueError),

    /// A source could not be built.
    #[error("source {name} could not be built: {source}")]
    Source {
        name: String,
        #[source]
        source: watchpool_source::SourceError,
    },

    /// A source with this name is already registered.
    #[error("source already registered: {0}")]
    DuplicateSource(String),

    /// No source with this name is registered.
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// Operation not allowed in the current state.
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: OrchestratorState,
    },

    /// Not every source acknowledged its stop; the queue was left open.
    #[error("only {acknowledged} of {registered} sources acknowledged stop")]
    IncompleteShutdown {
        acknowledged: usize,
        registered: usize,
    },

    /// The downstream consumer failed.
    #[error("consumer error: {0}")]
    Consumer(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
