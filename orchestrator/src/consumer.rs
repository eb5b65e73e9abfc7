//! Downstream consumers of aggregated events.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};
use watchpool_queue::Event;

use crate::error::Result;

/// Receives every event drained from the aggregation queue.
#[async_trait]
pub trait EventConsumer: Send {
    /// Handle one event.
    async fn consume(&mut self, event: Event) -> Result<()>;

    /// Called once after end-of-stream.
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Counts events per source and per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTally {
    pub total: u64,
    pub by_source: BTreeMap<String, u64>,
    pub by_kind: BTreeMap<String, u64>,
}

impl EventTally {
    pub fn record(&mut self, event: &Event) {
        self.total += 1;
        *self.by_source.entry(event.source().to_string()).or_default() += 1;
        *self.by_kind.entry(event.kind().as_str().to_string()).or_default() += 1;
    }

    pub fn for_source(&self, source: &str) -> u64 {
        self.by_source.get(source).copied().unwrap_or(0)
    }
}

#[async_trait]
impl EventConsumer for EventTally {
    async fn consume(&mut self, event: Event) -> Result<()> {
        self.record(&event);
        Ok(())
    }
}

/// Writes every event as one JSON line.
///
/// The output can be replayed through a `replay://` endpoint.
pub struct JsonlRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl JsonlRecorder {
    /// Create (or truncate) the recording file.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await?;
        debug!("Recording events to {}", path.display());

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl EventConsumer for JsonlRecorder {
    async fn consume(&mut self, event: Event) -> Result<()> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.written += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.writer.flush().await?;
        info!(
            "Recorded {} events to {}",
            self.written,
            self.path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl<C: EventConsumer> EventConsumer for Option<C> {
    async fn consume(&mut self, event: Event) -> Result<()> {
        match self {
            Some(consumer) => consumer.consume(event).await,
            None => Ok(()),
        }
    }

    async fn finish(&mut self) -> Result<()> {
        match self {
            Some(consumer) => consumer.finish().await,
            None => Ok(()),
        }
    }
}

/// Both consumers see every event; the first error wins.
#[async_trait]
impl<A: EventConsumer, B: EventConsumer> EventConsumer for (A, B) {
    async fn consume(&mut self, event: Event) -> Result<()> {
        let first = self.0.consume(event.clone()).await;
        let second = self.1.consume(event).await;
        first.and(second)
    }

    async fn finish(&mut self) -> Result<()> {
        let first = self.0.finish().await;
        let second = self.1.finish().await;
        first.and(second)
    }
}
