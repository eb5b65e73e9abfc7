//! Scripted sources shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use watchpool_orchestrator::{SourceFactory, SourceSpec, WatchSource};
use watchpool_source::{Change, SourceError};

/// What a scripted source does once connected.
#[derive(Clone)]
pub enum Script {
    /// Emit this many adds, then wait forever.
    Emit(usize),

    /// Emit this many adds, then report exhaustion.
    EmitThenFinish(usize),

    /// Emit adds without end.
    Endless,

    /// Fail to connect.
    FailConnect,
}

pub struct ScriptedSource {
    endpoint: String,
    script: Script,
    emitted: usize,
}

#[async_trait]
impl WatchSource for ScriptedSource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&mut self) -> watchpool_source::Result<()> {
        match self.script {
            Script::FailConnect => Err(SourceError::Connect("scripted failure".to_string())),
            _ => Ok(()),
        }
    }

    async fn next_change(&mut self) -> watchpool_source::Result<Option<Change>> {
        let limit = match self.script {
            Script::Emit(limit) | Script::EmitThenFinish(limit) => Some(limit),
            Script::Endless => None,
            Script::FailConnect => return Err(SourceError::NotConnected),
        };

        if limit.is_some_and(|limit| self.emitted >= limit) {
            if matches!(self.script, Script::EmitThenFinish(_)) {
                return Ok(None);
            }
            std::future::pending::<()>().await;
        }

        let seq = self.emitted;
        self.emitted += 1;
        if matches!(self.script, Script::Endless) {
            tokio::task::yield_now().await;
        }
        Ok(Some(Change::add(json!({ "seq": seq }))))
    }
}

/// Builds scripted sources by name; unknown names fail to build.
#[derive(Default)]
pub struct ScriptedFactory {
    scripts: Mutex<HashMap<String, Script>>,
}

impl ScriptedFactory {
    pub fn with(self, name: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), script);
        self
    }
}

impl SourceFactory for ScriptedFactory {
    fn build(&self, spec: &SourceSpec) -> watchpool_source::Result<Box<dyn WatchSource>> {
        let script = self.scripts.lock().unwrap().get(&spec.name).cloned().ok_or_else(|| {
            SourceError::UnsupportedEndpoint {
                endpoint: spec.endpoint.clone(),
                scheme: "scripted".to_string(),
            }
        })?;

        Ok(Box::new(ScriptedSource {
            endpoint: spec.endpoint.clone(),
            script,
            emitted: 0,
        }))
    }
}

pub fn spec(name: &str) -> SourceSpec {
    SourceSpec::new(name, format!("scripted://{name}"))
}

pub fn seq(event: &watchpool_orchestrator::Event) -> u64 {
    event.payload()["seq"].as_u64().unwrap()
}
