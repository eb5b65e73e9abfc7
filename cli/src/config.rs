//! Runner configuration: a TOML file plus command-line overrides.
//!
//! ```toml
//! queue_capacity = 1000
//! disable_watcher = false
//! record_file = "events.jsonl"
//!
//! [admission]
//! policy = "token_bucket"
//! burst = 8
//! refill_ms = 250
//!
//! [source_defaults]
//! resync_interval_secs = 1800
//! privileged_access = false
//!
//! [mode]
//! kind = "many"
//!
//! [[mode.contexts]]
//! name = "alpha"
//! endpoint = "dir:///srv/alpha"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use watchpool_orchestrator::{
    AdmissionPolicy, ContextConfig, IngestMode, OrchestratorConfig, SourceSettings, SourceSpec,
    local_endpoint,
};

use crate::cli::Cli;

/// Name of the extra source that replays a playback file.
pub const PLAYBACK_SOURCE: &str = "playback";

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid context {0:?}, expected NAME=ENDPOINT")]
    InvalidContext(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the runner needs to start a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchpoolConfig {
    /// Capacity of the aggregation queue.
    pub queue_capacity: usize,

    /// Start no watch sources (a playback file still plays).
    pub disable_watcher: bool,

    /// Recording to replay as an extra source.
    pub playback_file: Option<PathBuf>,

    /// File every consumed event is written to.
    pub record_file: Option<PathBuf>,

    /// How source start-ups are spaced out.
    pub admission: AdmissionPolicy,

    /// Settings every source starts from.
    pub source_defaults: SourceSettings,

    /// Which endpoints to watch.
    pub mode: IngestMode,
}

impl Default for WatchpoolConfig {
    fn default() -> Self {
        let orchestrator = OrchestratorConfig::default();
        Self {
            queue_capacity: orchestrator.queue_capacity,
            disable_watcher: false,
            playback_file: None,
            record_file: None,
            admission: orchestrator.admission,
            source_defaults: SourceSettings::default(),
            mode: IngestMode::default(),
        }
    }
}

impl WatchpoolConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the file named on the command line (or defaults), then apply
    /// the remaining flags on top.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(cli)?;
        Ok(config)
    }

    /// Apply command-line overrides.
    pub fn apply(&mut self, cli: &Cli) -> Result<(), ConfigError> {
        if let Some(capacity) = cli.queue_capacity {
            self.queue_capacity = capacity;
        }
        if let Some(path) = &cli.playback_file {
            self.playback_file = Some(path.clone());
        }
        if let Some(path) = &cli.record_file {
            self.record_file = Some(path.clone());
        }
        if cli.disable_watcher {
            self.disable_watcher = true;
        }

        if let Some(endpoint) = &cli.endpoint {
            let name = match &self.mode {
                IngestMode::Single { name, .. } => name.clone(),
                IngestMode::Many { .. } => "local".to_string(),
            };
            self.mode = IngestMode::Single {
                name,
                endpoint: endpoint.clone(),
            };
        } else if !cli.contexts.is_empty() {
            let contexts = cli
                .contexts
                .iter()
                .map(String::as_str)
                .map(parse_context)
                .collect::<Result<Vec<_>, _>>()?;
            self.mode = IngestMode::Many { contexts };
        }

        Ok(())
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }

        match self.admission {
            AdmissionPolicy::Ramp { interval_ms: 0 } => {
                return Err(ConfigError::Invalid(
                    "ramp interval_ms must be greater than zero".to_string(),
                ));
            }
            AdmissionPolicy::TokenBucket { burst: 0, .. } => {
                return Err(ConfigError::Invalid(
                    "token bucket burst must be greater than zero".to_string(),
                ));
            }
            _ => {}
        }

        if self.disable_watcher {
            return Ok(());
        }

        match &self.mode {
            IngestMode::Single { name, endpoint } => {
                if name.trim().is_empty() || endpoint.trim().is_empty() {
                    return Err(ConfigError::Invalid(
                        "single mode needs a name and an endpoint".to_string(),
                    ));
                }
            }
            IngestMode::Many { contexts } => {
                if contexts.is_empty() {
                    return Err(ConfigError::Invalid(
                        "many mode needs at least one context".to_string(),
                    ));
                }

                let mut seen = HashSet::new();
                for context in contexts {
                    if context.endpoint.trim().is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "context {} has no endpoint",
                            context.name
                        )));
                    }
                    if !seen.insert(context.name.as_str()) {
                        return Err(ConfigError::Invalid(format!(
                            "duplicate context name {}",
                            context.name
                        )));
                    }
                    if context.name == PLAYBACK_SOURCE && self.playback_file.is_some() {
                        return Err(ConfigError::Invalid(format!(
                            "context name {PLAYBACK_SOURCE} is reserved for the playback file"
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_queue_capacity(self.queue_capacity)
            .with_admission(self.admission)
    }

    /// Sources to start: the watched endpoints (unless disabled) followed
    /// by the playback file, if any.
    pub fn source_specs(&self) -> Vec<SourceSpec> {
        let mut specs = if self.disable_watcher {
            Vec::new()
        } else {
            self.mode.resolve(&self.source_defaults)
        };

        if let Some(path) = &self.playback_file {
            specs.push(SourceSpec::new(
                PLAYBACK_SOURCE,
                local_endpoint("replay", path),
            ));
        }

        specs
    }

    /// Effective configuration as TOML, for logging at start-up.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn parse_context(raw: &str) -> Result<ContextConfig, ConfigError> {
    let (name, endpoint) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidContext(raw.to_string()))?;

    let (name, endpoint) = (name.trim(), endpoint.trim());
    if name.is_empty() || endpoint.is_empty() {
        return Err(ConfigError::InvalidContext(raw.to_string()));
    }

    Ok(ContextConfig::new(name, endpoint))
}
