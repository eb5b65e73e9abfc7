//! Change events carried by the aggregation queue.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An observed change from one source.
///
/// Events are immutable once built: fields are only reachable through
/// accessors, and ownership moves into the queue on push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    source: String,
    kind: EventKind,
    payload: serde_json::Value,
    observed_at: DateTime<Utc>,
}

impl Event {
    /// Create an event observed now.
    pub fn new(source: impl Into<String>, kind: EventKind, payload: serde_json::Value) -> Self {
        Self::observed_at(source, kind, payload, Utc::now())
    }

    /// Create an event with an explicit observation time.
    pub fn observed_at(
        source: impl Into<String>,
        kind: EventKind,
        payload: serde_json::Value,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.into(),
            kind,
            payload,
            observed_at,
        }
    }

    /// Identifier of the source that observed the change.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn observed(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Take the payload out of the event.
    pub fn into_payload(self) -> serde_json::Value {
        self.payload
    }
}

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Object appeared.
    Add,

    /// Object changed.
    Update,

    /// Object went away.
    Delete,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
