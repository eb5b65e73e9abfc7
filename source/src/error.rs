//! Error types for watch sources.

use thiserror::Error;

/// Result type alias for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Errors that can occur while building or running a watch source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Endpoint could not be parsed.
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// No built-in source handles this endpoint scheme.
    #[error("unsupported endpoint scheme {scheme:?} in {endpoint}")]
    UnsupportedEndpoint { endpoint: String, scheme: String },

    /// Directory not found.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// Path exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The source was asked for changes before connecting.
    #[error("source is not connected")]
    NotConnected,

    /// Connection to the backend failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Backend reported an unrecoverable error while watching.
    #[error("backend error: {0}")]
    Backend(String),

    /// A playback line could not be decoded.
    #[error("invalid record on line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
