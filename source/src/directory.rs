//! Directory source: watches a local directory tree.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use notify::event::ModifyKind;
use notify::{EventKind as NotifyKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::change::Change;
use crate::config::SourceSettings;
use crate::error::{Result, SourceError};
use crate::snapshot::DirectorySnapshot;
use crate::source::WatchSource;

/// Buffer between the notify thread and the source.
const NOTIFY_BUFFER: usize = 1000;

/// Watches a directory for file changes.
///
/// Connecting lists the directory (every existing file is reported as
/// added), then live notifications are reported as they arrive. When a
/// resync interval is configured the directory is re-listed periodically
/// and the difference is reported, which repairs anything the live
/// notifications missed.
pub struct DirectorySource {
    endpoint: String,
    settings: SourceSettings,
    root: PathBuf,

    /// Shared with the blocking task that walks the tree.
    snapshot: Arc<Mutex<DirectorySnapshot>>,
    watcher: Option<RecommendedWatcher>,
    notifications: Option<mpsc::Receiver<notify::Result<notify::Event>>>,
    resync: Option<Interval>,
    pending: VecDeque<Change>,
}

/// Walk the tree on the blocking pool and diff it against the snapshot.
async fn rescan(snapshot: &Arc<Mutex<DirectorySnapshot>>, endpoint: &str) -> Result<Vec<Change>> {
    let snapshot = Arc::clone(snapshot);
    tokio::task::spawn_blocking(move || {
        snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rescan()
    })
    .await
    .map_err(|e| SourceError::Backend(format!("directory scan of {endpoint} failed: {e}")))
}

enum Wake {
    Notification(Option<notify::Result<notify::Event>>),
    Resync,
}

impl DirectorySource {
    /// Create a directory source. Nothing is touched until `connect`.
    pub fn new(endpoint: impl Into<String>, root: impl Into<PathBuf>, settings: SourceSettings) -> Self {
        let root = root.into();

        // Privileged access lets the watch leave the root through symlinks.
        let snapshot = DirectorySnapshot::new(
            root.clone(),
            &settings.exclude_patterns,
            settings.privileged_access,
        );

        Self {
            endpoint: endpoint.into(),
            settings,
            root,
            snapshot: Arc::new(Mutex::new(snapshot)),
            watcher: None,
            notifications: None,
            resync: None,
            pending: VecDeque::new(),
        }
    }

    fn snapshot(&self) -> MutexGuard<'_, DirectorySnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn absorb(&mut self, event: notify::Event) {
        let force_update = match event.kind {
            NotifyKind::Access(_) | NotifyKind::Other => return,
            NotifyKind::Modify(ModifyKind::Metadata(_)) => {
                if !self.settings.watch_metadata {
                    return;
                }
                true
            }
            NotifyKind::Modify(ModifyKind::Data(_)) => true,
            _ => false,
        };

        let mut snapshot = self.snapshot();
        let changes: Vec<Change> = event
            .paths
            .iter()
            .flat_map(|path| snapshot.observe(path, force_update))
            .collect();
        drop(snapshot);
        self.pending.extend(changes);
    }
}

#[async_trait]
impl WatchSource for DirectorySource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&mut self) -> Result<()> {
        let root = self.root.clone();

        if !root.exists() {
            return Err(SourceError::DirectoryNotFound(root.display().to_string()));
        }
        if !root.is_dir() {
            return Err(SourceError::NotADirectory(root.display().to_string()));
        }

        let (tx, rx) = mpsc::channel(NOTIFY_BUFFER);

        // Runs on notify's own thread; a full buffer holds that thread back.
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                if tx.blocking_send(res).is_err() {
                    debug!("directory source dropped, discarding notification");
                }
            },
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        // Initial listing after the watch is armed so nothing falls in between.
        let initial = rescan(&self.snapshot, &self.endpoint).await?;
        self.pending.extend(initial);

        self.resync = self.settings.resync_interval().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        self.watcher = Some(watcher);
        self.notifications = Some(rx);

        info!(
            "Watching directory {} ({} files)",
            root.display(),
            self.snapshot().len()
        );
        Ok(())
    }

    async fn next_change(&mut self) -> Result<Option<Change>> {
        loop {
            if let Some(change) = self.pending.pop_front() {
                return Ok(Some(change));
            }

            let wake = {
                let Some(notifications) = self.notifications.as_mut() else {
                    return Err(SourceError::NotConnected);
                };
                let resync = self.resync.as_mut();

                tokio::select! {
                    received = notifications.recv() => Wake::Notification(received),
                    _ = async {
                        match resync {
                            Some(interval) => {
                                interval.tick().await;
                            }
                            None => std::future::pending::<()>().await,
                        }
                    } => Wake::Resync,
                }
            };

            match wake {
                Wake::Notification(Some(Ok(event))) => self.absorb(event),
                Wake::Notification(Some(Err(e))) => {
                    warn!("Watch error on {}: {e}", self.endpoint);
                }
                Wake::Notification(None) => return Ok(None),
                Wake::Resync => {
                    debug!("Resyncing {}", self.endpoint);
                    let changes = rescan(&self.snapshot, &self.endpoint).await?;
                    self.pending.extend(changes);
                }
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            let _ = watcher.unwatch(&self.root);
        }
        self.notifications = None;
        self.resync = None;
        debug!("Directory source disconnected: {}", self.endpoint);
    }
}
