//! Logging setup.
//!
//! `RUST_LOG` takes precedence over the `--log-level` flag:
//! ```bash
//! RUST_LOG=watchpool_source=debug watchpool --endpoint dir:///srv/data
//! ```

use tracing_subscriber::EnvFilter;

/// Initialize logging to stderr.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();

    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}
