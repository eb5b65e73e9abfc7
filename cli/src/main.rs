use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use watchpool_cli::{Cli, WatchpoolConfig, logging};
use watchpool_orchestrator::{EventTally, JsonlRecorder, Orchestrator, Session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let config = WatchpoolConfig::from_cli(&cli).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    match config.to_toml() {
        Ok(effective) => info!("Effective configuration:\n{effective}"),
        Err(e) => warn!("Could not render configuration: {e}"),
    }

    let specs = config.source_specs();
    if config.disable_watcher {
        info!("Watcher disabled");
    }
    if specs.is_empty() {
        warn!("No sources configured, nothing to watch");
    }

    let recorder = match &config.record_file {
        Some(path) => Some(
            JsonlRecorder::create(path)
                .await
                .with_context(|| format!("failed to create record file {}", path.display()))?,
        ),
        None => None,
    };

    let orchestrator = Orchestrator::with_endpoint_factory(config.orchestrator_config());
    let outcome = Session::new(orchestrator, specs)
        .run((EventTally::default(), recorder), shutdown_signal())
        .await
        .context("session failed")?;

    let (tally, _) = &outcome.consumer;
    for (source, count) in &tally.by_source {
        info!("{source}: {count} events");
    }
    for (kind, count) in &tally.by_kind {
        info!("{kind}: {count} events");
    }
    for failed in outcome.report.failed() {
        warn!("Source {} ({}) failed", failed.name, failed.endpoint);
    }
    if outcome.consumer_errors > 0 {
        error!("{} events could not be consumed", outcome.consumer_errors);
    }

    info!("watchpool exited cleanly ({} events)", tally.total);
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
