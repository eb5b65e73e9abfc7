//! # Aggregation Queue
//!
//! This crate provides the single bounded queue that every watch source
//! writes into and the downstream stage reads from.
//!
//! ## Features
//!
//! - **Backpressure**: producers wait while the queue is full, nothing is dropped
//! - **Single Closer**: only the [`EventQueue`] value can close the queue
//! - **Drain on Close**: buffered events are still delivered after close
//! - **Loud Misuse**: pushing after close is an error, never a silent drop
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Aggregation Queue                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EventSink (N producers) ──► buffer[C] ──► EventReceiver        │
//! │                                 ▲                               │
//! │                                 │                               │
//! │                     EventQueue (close, owner only)              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod event;
pub mod queue;

pub use error::{QueueError, Result};
pub use event::{Event, EventKind};
pub use queue::{EventQueue, EventReceiver, EventSink, QueueStats, Rejected, bounded};

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 1000;
