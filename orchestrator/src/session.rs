//! A complete run: start, consume until told to stop, shut down, drain.

use std::future::Future;

use tracing::{error, info, warn};
use watchpool_queue::EventReceiver;
use watchpool_source::SourceSpec;

use crate::consumer::EventConsumer;
use crate::error::{OrchestratorError, Result};
use crate::orchestrator::{Orchestrator, ShutdownReport};

/// What a finished session leaves behind.
pub struct SessionOutcome<C> {
    /// The consumer, after `finish` was called on it.
    pub consumer: C,

    /// Shutdown report of the orchestrator.
    pub report: ShutdownReport,

    /// Events handed to the consumer.
    pub consumed: u64,

    /// Events the consumer failed to handle.
    pub consumer_errors: u64,
}

/// Runs an orchestrator from start to drained shutdown.
pub struct Session {
    orchestrator: Orchestrator,
    specs: Vec<SourceSpec>,
}

impl Session {
    pub fn new(orchestrator: Orchestrator, specs: Vec<SourceSpec>) -> Self {
        Self {
            orchestrator,
            specs,
        }
    }

    /// Run until `shutdown` resolves or every source has finished on its
    /// own, then stop all sources and wait for the consumer to drain the
    /// queue.
    ///
    /// The consumer runs on its own task from the moment the queue exists,
    /// so sources never block on a queue nobody is reading.
    pub async fn run<C, F>(self, consumer: C, shutdown: F) -> Result<SessionOutcome<C>>
    where
        C: EventConsumer + 'static,
        F: Future<Output = ()> + Send,
    {
        let Self {
            mut orchestrator,
            specs,
        } = self;

        let receiver = orchestrator.start(specs).await?;
        let drain = tokio::spawn(drain(receiver, consumer));

        tokio::select! {
            _ = shutdown => info!("Shutdown requested"),
            _ = orchestrator.sources_finished() => info!("All sources finished"),
        }

        let report = match orchestrator.shutdown().await {
            Ok(report) => report,
            Err(e) => {
                // The queue stays open, so the consumer would never finish.
                drain.abort();
                return Err(e);
            }
        };

        let (consumer, consumed, consumer_errors) = drain
            .await
            .map_err(|e| OrchestratorError::Consumer(e.to_string()))?;

        if consumer_errors > 0 {
            warn!("Consumer failed on {consumer_errors} of {consumed} events");
        }
        info!("Session finished: {consumed} events consumed");

        Ok(SessionOutcome {
            consumer,
            report,
            consumed,
            consumer_errors,
        })
    }
}

/// Hand every event to the consumer until end-of-stream.
///
/// A failing event is logged and skipped; the queue keeps draining so
/// producers are never left blocked.
async fn drain<C: EventConsumer>(receiver: EventReceiver, mut consumer: C) -> (C, u64, u64) {
    let mut consumed = 0;
    let mut failures = 0;

    while let Some(event) = receiver.pop().await {
        consumed += 1;
        if let Err(e) = consumer.consume(event).await {
            failures += 1;
            error!("Consumer failed: {e}");
        }
    }

    if let Err(e) = consumer.finish().await {
        error!("Consumer failed to finish: {e}");
        failures += 1;
    }

    (consumer, consumed, failures)
}
