//! Command-line runner for the watch orchestrator.
//!
//! Loads a TOML configuration, applies command-line overrides, and runs one
//! session until interrupted.

pub mod cli;
pub mod config;
pub mod logging;

pub use cli::Cli;
pub use config::{ConfigError, WatchpoolConfig};
