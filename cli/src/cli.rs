use std::path::PathBuf;

use clap::Parser;

/// Watch local directories (or replay a recording) and aggregate every
/// change into one ordered stream.
#[derive(Parser, Debug, Default)]
#[command(name = "watchpool", version, about)]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long, env = "WATCHPOOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Watch a single endpoint (e.g. `dir:///srv/data`).
    #[arg(long, env = "WATCHPOOL_ENDPOINT", conflicts_with = "contexts")]
    pub endpoint: Option<String>,

    /// Watch several endpoints, given as `NAME=ENDPOINT`. Repeatable.
    #[arg(long = "context", value_name = "NAME=ENDPOINT")]
    pub contexts: Vec<String>,

    /// Capacity of the aggregation queue.
    #[arg(long, env = "WATCHPOOL_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Replay a recorded JSON-lines file as an extra source.
    #[arg(long, env = "WATCHPOOL_PLAYBACK_FILE")]
    pub playback_file: Option<PathBuf>,

    /// Record every event to a JSON-lines file.
    #[arg(long, env = "WATCHPOOL_RECORD_FILE")]
    pub record_file: Option<PathBuf>,

    /// Do not start any watch sources.
    #[arg(long, env = "WATCHPOOL_DISABLE_WATCHER")]
    pub disable_watcher: bool,

    /// Log filter, used when `RUST_LOG` is not set.
    #[arg(long, env = "WATCHPOOL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
