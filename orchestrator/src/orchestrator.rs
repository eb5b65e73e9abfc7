//! The orchestrator: owns the aggregation queue and every source handle.

use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use watchpool_queue::{EventQueue, EventReceiver, EventSink, QueueStats, bounded};
use watchpool_source::{
    EndpointFactory, HandleState, SourceFactory, SourceHandle, SourceMetrics, SourceSpec,
};

use crate::admission::AdmissionControl;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};

/// Lifecycle state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Final state of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub name: String,
    pub endpoint: String,
    pub state: HandleState,
    pub metrics: SourceMetrics,
}

impl SourceReport {
    fn of(handle: &SourceHandle) -> Self {
        Self {
            name: handle.name().to_string(),
            endpoint: handle.endpoint().to_string(),
            state: handle.state(),
            metrics: handle.metrics(),
        }
    }
}

/// A source that could not be built and was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedSource {
    pub name: String,
    pub endpoint: String,
    pub reason: String,
}

/// Outcome of a shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Every registered source, in registration order.
    pub sources: Vec<SourceReport>,

    /// Sources skipped because they could not be built.
    pub rejected: Vec<RejectedSource>,

    /// Queue counters taken just before the queue was closed.
    pub queue: Option<QueueStats>,
}

impl ShutdownReport {
    /// Sources that ended in failure.
    pub fn failed(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|source| source.state == HandleState::Failed)
    }

    /// Total events produced across all sources.
    pub fn total_events(&self) -> u64 {
        self.sources.iter().map(|source| source.metrics.events).sum()
    }
}

/// Starts sources, aggregates their events and shuts them down in order.
///
/// The orchestrator is the only holder of the queue's close capability. It
/// closes the queue only after every registered handle has acknowledged its
/// stop, so no source ever pushes to a closed queue.
pub struct Orchestrator {
    config: OrchestratorConfig,
    factory: Arc<dyn SourceFactory>,
    state: OrchestratorState,
    admission: AdmissionControl,
    queue: Option<EventQueue>,
    sink: Option<EventSink>,
    handles: IndexMap<String, SourceHandle>,
    rejected: Vec<RejectedSource>,
    report: Option<ShutdownReport>,

    /// Acknowledged and registered counts of a shutdown that lost track of a
    /// handle. Once set the queue is never closed here; dropping the
    /// orchestrator closes it.
    incomplete: Option<(usize, usize)>,
}

impl Orchestrator {
    /// Create an orchestrator that builds sources with `factory`.
    pub fn new(config: OrchestratorConfig, factory: Arc<dyn SourceFactory>) -> Self {
        let admission = AdmissionControl::new(config.admission);
        Self {
            config,
            factory,
            state: OrchestratorState::Idle,
            admission,
            queue: None,
            sink: None,
            handles: IndexMap::new(),
            rejected: Vec::new(),
            report: None,
            incomplete: None,
        }
    }

    /// Create an orchestrator that builds sources from their endpoint scheme.
    pub fn with_endpoint_factory(config: OrchestratorConfig) -> Self {
        Self::new(config, Arc::new(EndpointFactory))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Create the queue and start one handle per spec.
    ///
    /// Specs that cannot be built, or that reuse a name, are logged and
    /// skipped; the rest start regardless. Returns the consuming end of the
    /// queue.
    pub async fn start(&mut self, specs: Vec<SourceSpec>) -> Result<EventReceiver> {
        self.require(OrchestratorState::Idle, "start")?;
        self.state = OrchestratorState::Starting;

        let (queue, sink, receiver) = match bounded(self.config.queue_capacity) {
            Ok(parts) => parts,
            Err(e) => {
                error!("Failed to create aggregation queue: {e}");
                self.state = OrchestratorState::Stopped;
                self.report = Some(ShutdownReport::default());
                return Err(e.into());
            }
        };
        self.queue = Some(queue);
        self.sink = Some(sink);

        let requested = specs.len();
        for spec in specs {
            if let Err(e) = self.launch(spec) {
                warn!("Skipping source: {e}");
            }
        }

        self.state = OrchestratorState::Running;
        info!(
            "Orchestrator running: {} of {} sources started (queue capacity {})",
            self.handles.len(),
            requested,
            self.config.queue_capacity
        );

        Ok(receiver)
    }

    /// Start one more source while running.
    pub async fn add_source(&mut self, spec: SourceSpec) -> Result<()> {
        self.require(OrchestratorState::Running, "add a source")?;
        self.launch(spec)
    }

    /// Stop and unregister one source while running.
    pub async fn remove_source(&mut self, name: &str) -> Result<SourceReport> {
        self.require(OrchestratorState::Running, "remove a source")?;

        let mut handle = self
            .handles
            .shift_remove(name)
            .ok_or_else(|| OrchestratorError::UnknownSource(name.to_string()))?;
        handle.stop().await;

        info!("Removed source {name}");
        Ok(SourceReport::of(&handle))
    }

    /// Stop every source, then close the queue.
    ///
    /// Idempotent: later calls return the first report. Calling it before
    /// `start` just moves the orchestrator to `Stopped`.
    pub async fn shutdown(&mut self) -> Result<ShutdownReport> {
        match self.state {
            OrchestratorState::Stopped => {
                debug!("Shutdown requested again, already stopped");
                return Ok(self.report.clone().unwrap_or_default());
            }
            OrchestratorState::Idle => {
                self.state = OrchestratorState::Stopped;
                let report = ShutdownReport::default();
                self.report = Some(report.clone());
                return Ok(report);
            }
            _ => {}
        }

        if let Some((acknowledged, registered)) = self.incomplete {
            warn!(
                "Shutdown requested again after only {acknowledged} of {registered} sources acknowledged, leaving queue open"
            );
            return Err(OrchestratorError::IncompleteShutdown {
                acknowledged,
                registered,
            });
        }

        self.state = OrchestratorState::Stopping;
        info!("Stopping {} sources", self.handles.len());

        // Our own sink must go too, or the queue still has a producer.
        self.sink = None;

        let registered = self.handles.len();
        let mut stops = JoinSet::new();
        for (index, (_, mut handle)) in self.handles.drain(..).enumerate() {
            stops.spawn(async move {
                handle.stop().await;
                (index, SourceReport::of(&handle))
            });
        }

        let mut sources = Vec::with_capacity(registered);
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok(stopped) => sources.push(stopped),
                Err(e) => error!("Stop task failed: {e}"),
            }
        }

        if sources.len() != registered {
            error!(
                "{} of {} sources acknowledged stop, leaving queue open",
                sources.len(),
                registered
            );
            self.incomplete = Some((sources.len(), registered));
            return Err(OrchestratorError::IncompleteShutdown {
                acknowledged: sources.len(),
                registered,
            });
        }

        sources.sort_by_key(|(index, _)| *index);
        let sources: Vec<SourceReport> = sources.into_iter().map(|(_, report)| report).collect();

        let mut queue_stats = None;
        if let Some(queue) = self.queue.take() {
            queue_stats = Some(queue.stats());
            queue.close();
        }

        let report = ShutdownReport {
            sources,
            rejected: std::mem::take(&mut self.rejected),
            queue: queue_stats,
        };

        for failed in report.failed() {
            warn!("Source {} ({}) ended in failure", failed.name, failed.endpoint);
        }
        info!(
            "Orchestrator stopped: {} sources, {} events produced",
            report.sources.len(),
            report.total_events()
        );

        self.state = OrchestratorState::Stopped;
        self.report = Some(report.clone());
        Ok(report)
    }

    /// Current state of every registered source, in registration order.
    pub fn source_states(&self) -> Vec<(String, HandleState)> {
        self.handles
            .iter()
            .map(|(name, handle)| (name.clone(), handle.state()))
            .collect()
    }

    pub fn source(&self, name: &str) -> Option<&SourceHandle> {
        self.handles.get(name)
    }

    pub fn source_count(&self) -> usize {
        self.handles.len()
    }

    /// Sources skipped so far because they could not be built.
    pub fn rejected(&self) -> &[RejectedSource] {
        &self.rejected
    }

    /// Queue counters, while the queue is open.
    pub fn queue_stats(&self) -> Option<QueueStats> {
        self.queue.as_ref().map(EventQueue::stats)
    }

    /// Wait until every source has connected or given up.
    pub async fn settled(&self) {
        join_all(self.handles.values().map(SourceHandle::settled)).await;
    }

    /// Wait until every source has finished producing on its own.
    ///
    /// Sources that watch indefinitely never finish, so this only resolves
    /// when every source is finite or has failed.
    pub async fn sources_finished(&self) {
        join_all(self.handles.values().map(SourceHandle::finished)).await;
    }

    fn require(&self, expected: OrchestratorState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn launch(&mut self, spec: SourceSpec) -> Result<()> {
        if self.handles.contains_key(&spec.name) {
            return Err(OrchestratorError::DuplicateSource(spec.name));
        }

        let Some(sink) = self.sink.clone() else {
            return Err(OrchestratorError::InvalidState {
                operation: "start a source",
                state: self.state,
            });
        };

        let source = match self.factory.build(&spec) {
            Ok(source) => source,
            Err(err) => {
                self.rejected.push(RejectedSource {
                    name: spec.name.clone(),
                    endpoint: spec.endpoint.clone(),
                    reason: err.to_string(),
                });
                return Err(OrchestratorError::Source {
                    name: spec.name,
                    source: err,
                });
            }
        };

        let delay = self.admission.next_delay(Instant::now());
        let name = spec.name.clone();
        let handle = SourceHandle::start(spec, source, sink, delay);
        self.handles.insert(name, handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionPolicy;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::default().with_admission(AdmissionPolicy::Unlimited)
    }

    fn recording(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    fn replay_spec(name: &str, file: &NamedTempFile) -> SourceSpec {
        SourceSpec::new(name, watchpool_source::local_endpoint("replay", file.path()))
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let mut orchestrator = Orchestrator::with_endpoint_factory(config());
        let report = orchestrator.shutdown().await.unwrap();

        assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
        assert!(report.sources.is_empty());
        assert!(orchestrator.start(vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_capacity_fails_start() {
        let mut orchestrator =
            Orchestrator::with_endpoint_factory(config().with_queue_capacity(0));
        let result = orchestrator.start(vec![]).await;

        assert!(matches!(result, Err(OrchestratorError::Queue(_))));
        assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
    }

    #[tokio::test]
    async fn test_unbuildable_sources_are_skipped() {
        let file = recording(&[r#"{"kind":"add","payload":1}"#]);
        let mut orchestrator = Orchestrator::with_endpoint_factory(config());

        let receiver = orchestrator
            .start(vec![
                SourceSpec::new("bad", "gopher://nowhere"),
                replay_spec("good", &file),
                replay_spec("good", &file),
            ])
            .await
            .unwrap();

        assert_eq!(orchestrator.source_count(), 1);
        assert_eq!(orchestrator.rejected().len(), 1);
        assert_eq!(orchestrator.rejected()[0].name, "bad");

        let event = receiver.pop().await.unwrap();
        assert_eq!(event.source(), "good");

        let report = orchestrator.shutdown().await.unwrap();
        assert_eq!(report.rejected.len(), 1);
        assert!(receiver.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let file = recording(&[r#"{"kind":"add","payload":1}"#]);
        let mut orchestrator = Orchestrator::with_endpoint_factory(config());
        let receiver = orchestrator
            .start(vec![replay_spec("one", &file)])
            .await
            .unwrap();

        let first = orchestrator.shutdown().await.unwrap();
        let second = orchestrator.shutdown().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.sources.len(), 1);
        assert!(first.queue.is_some());
        assert!(orchestrator.queue_stats().is_none());
        drop(receiver);
    }

    #[tokio::test]
    async fn test_add_and_remove_while_running() {
        let file = recording(&[r#"{"kind":"update","payload":"x"}"#]);
        let mut orchestrator = Orchestrator::with_endpoint_factory(config());
        let receiver = orchestrator.start(vec![]).await.unwrap();

        orchestrator.add_source(replay_spec("late", &file)).await.unwrap();
        assert!(matches!(
            orchestrator.add_source(replay_spec("late", &file)).await,
            Err(OrchestratorError::DuplicateSource(_))
        ));

        let event = receiver.pop().await.unwrap();
        assert_eq!(event.source(), "late");

        let removed = orchestrator.remove_source("late").await.unwrap();
        assert_eq!(removed.state, HandleState::Stopped);
        assert!(matches!(
            orchestrator.remove_source("late").await,
            Err(OrchestratorError::UnknownSource(_))
        ));

        orchestrator.shutdown().await.unwrap();
        assert!(matches!(
            orchestrator.add_source(replay_spec("after", &file)).await,
            Err(OrchestratorError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_repeated_shutdown_after_lost_handle_keeps_queue_open() {
        let mut orchestrator = Orchestrator::with_endpoint_factory(config());
        let receiver = orchestrator.start(vec![]).await.unwrap();

        // What a shutdown leaves behind when one of two stop tasks panicked.
        orchestrator.state = OrchestratorState::Stopping;
        orchestrator.sink = None;
        orchestrator.incomplete = Some((1, 2));

        for _ in 0..2 {
            assert!(matches!(
                orchestrator.shutdown().await,
                Err(OrchestratorError::IncompleteShutdown {
                    acknowledged: 1,
                    registered: 2,
                })
            ));
            let stats = orchestrator.queue_stats().unwrap();
            assert!(!stats.closed);
            assert!(!receiver.is_finished());
        }
        assert_eq!(orchestrator.state(), OrchestratorState::Stopping);

        drop(orchestrator);
        assert!(receiver.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_connect_is_reported() {
        let mut orchestrator = Orchestrator::with_endpoint_factory(config());
        let _receiver = orchestrator
            .start(vec![SourceSpec::new(
                "missing",
                "replay:///nonexistent/recording.jsonl",
            )])
            .await
            .unwrap();

        orchestrator.settled().await;
        assert_eq!(
            orchestrator.source_states(),
            vec![("missing".to_string(), HandleState::Failed)]
        );

        let report = orchestrator.shutdown().await.unwrap();
        assert_eq!(report.failed().count(), 1);
    }
}
