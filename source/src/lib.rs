//! # Watch Sources
//!
//! This crate provides the source side of watch aggregation: the
//! [`WatchSource`] abstraction, the [`SourceHandle`] that runs one source as
//! its own task, and the built-in sources.
//!
//! ## Features
//!
//! - **Uniform Sources**: anything that can connect and produce changes
//! - **Handle Lifecycle**: start without blocking, idempotent stop
//! - **Directory Source**: file system watching with periodic resync
//! - **Playback Source**: replay recorded JSON-lines files
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Watch Sources                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  SourceSpec ──► SourceFactory ──► WatchSource                   │
//! │                                        │                        │
//! │                                        ▼                        │
//! │                 SourceHandle (task) ──► EventSink               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod change;
pub mod config;
pub mod directory;
pub mod error;
pub mod handle;
pub mod playback;
pub mod snapshot;
pub mod source;

pub use change::Change;
pub use config::{SourceSettings, SourceSpec};
pub use directory::DirectorySource;
pub use error::{Result, SourceError};
pub use handle::{HandleState, SourceHandle, SourceMetrics};
pub use playback::PlaybackSource;
pub use snapshot::{DirectorySnapshot, FileEntry};
pub use source::{EndpointFactory, SourceFactory, WatchSource, local_endpoint};
