//! Changes produced by watch sources.

use serde::{Deserialize, Serialize};
use watchpool_queue::{Event, EventKind};

/// One change reported by a source, before it is stamped into an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// The kind of change.
    pub kind: EventKind,

    /// Source-specific description of the changed object.
    pub payload: serde_json::Value,
}

impl Change {
    /// Create a new change.
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }

    pub fn add(payload: serde_json::Value) -> Self {
        Self::new(EventKind::Add, payload)
    }

    pub fn update(payload: serde_json::Value) -> Self {
        Self::new(EventKind::Update, payload)
    }

    pub fn delete(payload: serde_json::Value) -> Self {
        Self::new(EventKind::Delete, payload)
    }

    /// Stamp the change as observed now by `source`.
    pub fn into_event(self, source: &str) -> Event {
        Event::new(source, self.kind, self.payload)
    }
}
