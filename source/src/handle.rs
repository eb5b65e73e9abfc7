//! Running instance of a watch source.
//!
//! A [`SourceHandle`] owns one producing task. The task waits out its
//! admission delay, connects, then moves every change into the aggregation
//! queue until it is cancelled, the source is exhausted, or something fails.
//! Stopping cancels the task and joins it, so once [`SourceHandle::stop`]
//! returns the handle can no longer push.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use watchpool_queue::{EventKind, EventSink, QueueError};

use crate::config::{SourceSettings, SourceSpec};
use crate::error::SourceError;
use crate::source::WatchSource;

/// Lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    /// Waiting for its admission slot.
    Pending,

    /// Connecting to the backend.
    Connecting,

    /// Producing events.
    Running,

    /// Stop requested, task not yet joined.
    Stopping,

    /// Finished without error.
    Stopped,

    /// Failed to connect, or failed while running.
    Failed,
}

impl HandleState {
    /// Whether the producing task has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Whether the source got past connecting (or gave up trying).
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Pending | Self::Connecting)
    }

    fn accepts(self, next: HandleState) -> bool {
        match (self, next) {
            (current, next) if current == next => false,
            (Self::Stopped | Self::Failed, _) => false,
            (Self::Stopping, next) => next.is_terminal(),
            _ => true,
        }
    }
}

/// Event counters of one handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetrics {
    /// Events pushed into the queue.
    pub events: u64,

    /// Added objects (granular metrics only).
    pub adds: u64,

    /// Updated objects (granular metrics only).
    pub updates: u64,

    /// Deleted objects (granular metrics only).
    pub deletes: u64,
}

#[derive(Default)]
struct Counters {
    events: AtomicU64,
    adds: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
}

impl Counters {
    fn record(&self, kind: EventKind, granular: bool) {
        self.events.fetch_add(1, Ordering::Relaxed);
        if !granular {
            return;
        }
        let counter = match kind {
            EventKind::Add => &self.adds,
            EventKind::Update => &self.updates,
            EventKind::Delete => &self.deletes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SourceMetrics {
        SourceMetrics {
            events: self.events.load(Ordering::Relaxed),
            adds: self.adds.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

fn advance(state: &watch::Sender<HandleState>, next: HandleState) -> bool {
    state.send_if_modified(|current| {
        if current.accepts(next) {
            *current = next;
            true
        } else {
            false
        }
    })
}

/// A started watch source.
pub struct SourceHandle {
    name: String,
    endpoint: String,
    settings: SourceSettings,
    state: Arc<watch::Sender<HandleState>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl SourceHandle {
    /// Start producing from `source` into `sink`.
    ///
    /// Returns as soon as the task is spawned. The task waits
    /// `admission_delay` before connecting. Must be called from within a
    /// Tokio runtime.
    pub fn start(
        spec: SourceSpec,
        source: Box<dyn WatchSource>,
        sink: EventSink,
        admission_delay: Duration,
    ) -> Self {
        let SourceSpec {
            name,
            endpoint,
            settings,
        } = spec;

        let (state, _) = watch::channel(HandleState::Pending);
        let state = Arc::new(state);
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let task = tokio::spawn(produce(
            source,
            Producer {
                name: name.clone(),
                sink,
                state: state.clone(),
                cancel: cancel.clone(),
                counters: counters.clone(),
                granular: settings.granular_metrics,
                admission_delay,
            },
        ));

        debug!(source = %name, %endpoint, ?admission_delay, "watch source scheduled");

        Self {
            name,
            endpoint,
            settings,
            state,
            cancel,
            task: Some(task),
            counters,
        }
    }

    /// Stop the handle and wait for its task to finish.
    ///
    /// Idempotent. Once this returns the handle will not push again.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        advance(&self.state, HandleState::Stopping);
        self.cancel.cancel();

        if let Err(e) = task.await {
            error!(source = %self.name, "watch task ended abnormally: {e}");
            advance(&self.state, HandleState::Failed);
        }

        debug!(source = %self.name, state = ?self.state(), "watch source stopped");
    }

    /// Wait until the source has connected or given up.
    pub async fn settled(&self) -> HandleState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|state| state.is_settled()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Wait until the producing task has finished on its own or been stopped.
    pub async fn finished(&self) -> HandleState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    pub fn state(&self) -> HandleState {
        *self.state.borrow()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    pub fn metrics(&self) -> SourceMetrics {
        self.counters.snapshot()
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Producer {
    name: String,
    sink: EventSink,
    state: Arc<watch::Sender<HandleState>>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    granular: bool,
    admission_delay: Duration,
}

enum Outcome {
    Cancelled,
    Exhausted,
    Failed(SourceError),
    QueueClosed,
}

async fn produce(mut source: Box<dyn WatchSource>, producer: Producer) {
    let Producer {
        name,
        sink,
        state,
        cancel,
        counters,
        granular,
        admission_delay,
    } = producer;
    let endpoint = source.endpoint().to_string();

    if !admission_delay.is_zero() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                advance(&state, HandleState::Stopped);
                return;
            }
            _ = tokio::time::sleep(admission_delay) => {}
        }
    }

    advance(&state, HandleState::Connecting);
    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = source.connect() => Some(result),
    };

    match connected {
        None => {
            source.disconnect().await;
            advance(&state, HandleState::Stopped);
            return;
        }
        Some(Err(e)) => {
            warn!(source = %name, %endpoint, "failed to start watch source: {e}");
            advance(&state, HandleState::Failed);
            return;
        }
        Some(Ok(())) => {}
    }

    advance(&state, HandleState::Running);
    info!(source = %name, %endpoint, "watch source running");

    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Outcome::Cancelled,
            next = source.next_change() => next,
        };

        let change = match next {
            Ok(Some(change)) => change,
            Ok(None) => break Outcome::Exhausted,
            Err(e) => break Outcome::Failed(e),
        };

        let kind = change.kind;
        let event = change.into_event(&name);

        // A push still waiting for a slot is abandoned on cancel; the event
        // was never buffered.
        let pushed = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Outcome::Cancelled,
            pushed = sink.push(event) => pushed,
        };

        match pushed {
            Ok(()) => {
                counters.record(kind, granular);
                if granular {
                    debug!(source = %name, %kind, "event queued");
                }
            }
            Err(QueueError::Closed) => break Outcome::QueueClosed,
            Err(e) => break Outcome::Failed(SourceError::Backend(e.to_string())),
        }
    };

    source.disconnect().await;

    let events = counters.events.load(Ordering::Relaxed);
    match outcome {
        Outcome::Cancelled => {
            advance(&state, HandleState::Stopped);
            debug!(source = %name, events, "watch source cancelled");
        }
        Outcome::Exhausted => {
            advance(&state, HandleState::Stopped);
            info!(source = %name, events, "watch source exhausted");
        }
        Outcome::Failed(e) => {
            advance(&state, HandleState::Failed);
            warn!(source = %name, %endpoint, events, "watch source failed: {e}");
        }
        Outcome::QueueClosed => {
            advance(&state, HandleState::Failed);
            error!(
                source = %name,
                %endpoint,
                events,
                "aggregation queue closed while the source was still running"
            );
        }
    }
}
