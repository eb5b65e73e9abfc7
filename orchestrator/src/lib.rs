//! # Watch Orchestrator
//!
//! This crate starts one watch source per configured endpoint, funnels all
//! of their events into a single bounded queue, and shuts everything down
//! in an order that neither loses buffered events nor lets a source write
//! to a queue its consumer has been told is finished.
//!
//! ## Shutdown order
//!
//! 1. Every source handle is told to stop (including ones that never connected)
//! 2. All stops are joined; each join is an acknowledgement that the source
//!    can no longer push
//! 3. Only when every handle has acknowledged is the queue closed
//! 4. The consumer drains what is buffered and then sees end-of-stream
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Session                                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  IngestMode ──► [SourceSpec] ──► Orchestrator                   │
//! │                                     │                           │
//! │            ┌────────────────────────┼──────────────────┐        │
//! │            ▼                        ▼                  ▼        │
//! │      SourceHandle             SourceHandle       SourceHandle   │
//! │            └────────────────────────┼──────────────────┘        │
//! │                                     ▼                           │
//! │                            Aggregation Queue                    │
//! │                                     │                           │
//! │                                     ▼                           │
//! │                              EventConsumer                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use watchpool_orchestrator::{EventTally, Orchestrator, OrchestratorConfig, Session};
//!
//! let orchestrator = Orchestrator::with_endpoint_factory(OrchestratorConfig::default());
//! let outcome = Session::new(orchestrator, specs)
//!     .run(EventTally::default(), shutdown_signal())
//!     .await?;
//! ```

pub mod admission;
pub mod config;
pub mod consumer;
pub mod error;
pub mod orchestrator;
pub mod session;

pub use admission::{AdmissionControl, AdmissionPolicy};
pub use config::{ContextConfig, IngestMode, OrchestratorConfig};
pub use consumer::{EventConsumer, EventTally, JsonlRecorder};
pub use error::{OrchestratorError, Result};
pub use orchestrator::{
    Orchestrator, OrchestratorState, RejectedSource, ShutdownReport, SourceReport,
};
pub use session::{Session, SessionOutcome};

// Re-export from dependencies for convenience
pub use watchpool_queue::{Event, EventKind, EventReceiver, QueueStats};
pub use watchpool_source::{
    EndpointFactory, HandleState, SourceFactory, SourceSettings, SourceSpec, WatchSource,
    local_endpoint,
};
