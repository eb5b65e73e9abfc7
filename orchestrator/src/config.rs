//! Configuration types for the orchestrator.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use watchpool_source::{SourceSettings, SourceSpec};

use crate::admission::AdmissionPolicy;

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Capacity of the aggregation queue.
    pub queue_capacity: usize,

    /// How source start-ups are spaced out.
    pub admission: AdmissionPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: watchpool_queue::DEFAULT_CAPACITY,
            admission: AdmissionPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_admission(mut self, policy: AdmissionPolicy) -> Self {
        self.admission = policy;
        self
    }
}

/// One entry of a multi-context deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    pub name: String,
    pub endpoint: String,

    /// Overrides the default; off unless set.
    #[serde(default)]
    pub privileged_access: Option<bool>,

    #[serde(default)]
    pub resync_interval_secs: Option<u64>,

    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl ContextConfig {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            privileged_access: None,
            resync_interval_secs: None,
            exclude_patterns: Vec::new(),
        }
    }
}

/// Which sources a deployment watches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestMode {
    /// Exactly one source, configured by the defaults as-is.
    Single { name: String, endpoint: String },

    /// One source per context. Privileged access is off unless a context
    /// asks for it.
    Many { contexts: Vec<ContextConfig> },
}

impl Default for IngestMode {
    fn default() -> Self {
        Self::Single {
            name: "local".to_string(),
            endpoint: "dir:.".to_string(),
        }
    }
}

impl IngestMode {
    /// Expand into concrete source specs.
    pub fn resolve(&self, defaults: &SourceSettings) -> Vec<SourceSpec> {
        match self {
            Self::Single { name, endpoint } => {
                vec![SourceSpec::new(name.clone(), endpoint.clone()).with_settings(defaults.clone())]
            }
            Self::Many { contexts } => contexts
                .iter()
                .map(|context| {
                    let mut settings = defaults
                        .clone()
                        .with_privileged_access(context.privileged_access.unwrap_or(false));
                    if let Some(secs) = context.resync_interval_secs {
                        settings = settings.with_resync(Duration::from_secs(secs));
                    }
                    settings
                        .exclude_patterns
                        .extend(context.exclude_patterns.iter().cloned());

                    SourceSpec::new(context.name.clone(), context.endpoint.clone())
                        .with_settings(settings)
                })
                .collect(),
        }
    }

    /// Number of sources this mode describes.
    pub fn len(&self) -> usize {
        match self {
            Self::Single { .. } => 1,
            Self::Many { contexts } => contexts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
