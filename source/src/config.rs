//! Configuration types for watch sources.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-source settings handed to the source when it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Interval between full resyncs, in seconds (0 disables resync).
    pub resync_interval_secs: u64,

    /// Interval between metadata refreshes, in seconds.
    pub metadata_refresh_secs: u64,

    /// Whether the source may use privileged access to its backend.
    pub privileged_access: bool,

    /// Whether to keep per-kind event counters.
    pub granular_metrics: bool,

    /// Whether metadata-only changes are reported.
    pub watch_metadata: bool,

    /// Extra patterns to exclude (wildcard patterns).
    pub exclude_patterns: Vec<String>,
}

impl SourceSettings {
    /// Resync interval, or `None` when resync is disabled.
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }

    pub fn metadata_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.metadata_refresh_secs)
    }

    /// Set the resync interval.
    pub fn with_resync(mut self, interval: Duration) -> Self {
        self.resync_interval_secs = interval.as_secs();
        self
    }

    /// Enable or disable privileged access.
    pub fn with_privileged_access(mut self, enabled: bool) -> Self {
        self.privileged_access = enabled;
        self
    }

    /// Enable per-kind counters.
    pub fn with_granular_metrics(mut self) -> Self {
        self.granular_metrics = true;
        self
    }

    /// Add an exclude pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            resync_interval_secs: 30 * 60,
            metadata_refresh_secs: 5 * 60,
            privileged_access: false,
            granular_metrics: false,
            watch_metadata: true,
            exclude_patterns: Vec::new(),
        }
    }
}

/// A source to start: its identity, endpoint and settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Unique name of the source (used as the event source identifier).
    pub name: String,

    /// URL-like endpoint.
    pub endpoint: String,

    /// Source settings.
    #[serde(default)]
    pub settings: SourceSettings,
}

impl SourceSpec {
    /// Create a spec with default settings.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            settings: SourceSettings::default(),
        }
    }

    /// Set the settings.
    pub fn with_settings(mut self, settings: SourceSettings) -> Self {
        self.settings = settings;
        self
    }
}
