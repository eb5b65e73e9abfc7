//! Playback source: replays a recorded JSON-lines file.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, info};
use watchpool_queue::EventKind;

use crate::change::Change;
use crate::error::{Result, SourceError};
use crate::source::WatchSource;

/// One line of a recording. Extra fields (such as the original source or
/// observation time written by the recorder) are ignored.
#[derive(Debug, Deserialize)]
struct Record {
    kind: EventKind,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Replays every record of a file once, then reports exhaustion.
pub struct PlaybackSource {
    endpoint: String,
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_no: usize,
    replayed: usize,
}

impl PlaybackSource {
    /// Create a playback source for a file.
    pub fn new(endpoint: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
            path: path.into(),
            lines: None,
            line_no: 0,
            replayed: 0,
        }
    }
}

#[async_trait]
impl WatchSource for PlaybackSource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&mut self) -> Result<()> {
        let file = File::open(&self.path).await?;
        self.lines = Some(BufReader::new(file).lines());
        info!("Playing back {}", self.path.display());
        Ok(())
    }

    async fn next_change(&mut self) -> Result<Option<Change>> {
        let lines = self.lines.as_mut().ok_or(SourceError::NotConnected)?;

        while let Some(line) = lines.next_line().await? {
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let record: Record = serde_json::from_str(&line).map_err(|source| {
                SourceError::Decode {
                    line: self.line_no,
                    source,
                }
            })?;
            self.replayed += 1;
            return Ok(Some(Change::new(record.kind, record.payload)));
        }

        debug!(
            "Playback of {} finished after {} records",
            self.path.display(),
            self.replayed
        );
        Ok(None)
    }

    async fn disconnect(&mut self) {
        self.lines = None;
    }
}
