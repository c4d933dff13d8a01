//! Relaycast replay - feed a change log through the fan-out core.

use std::fs::File;
use std::io::{self, BufReader};

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relaycast_cli::{parse_log, replay, Args, OutputFormat};
use relaycast_core::new_shared_metrics;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaycast_core=info,relaycast_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();
    let config = args.into_config();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log = ?config.log_path,
        topics = config.topics.len(),
        "starting replay"
    );

    let entries = match &config.log_path {
        Some(path) => parse_log(BufReader::new(File::open(path)?))?,
        None => parse_log(io::stdin().lock())?,
    };
    tracing::info!(entries = entries.len(), "change log loaded");

    let metrics = new_shared_metrics();
    let report = match replay(&config, &entries, metrics.clone()).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "replay failed");
            return Err(e.into());
        }
    };

    tracing::info!(
        entries = report.entries,
        unrouted = report.unrouted,
        dispatched = report.metrics.events_dispatched,
        "replay complete"
    );

    match config.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Prometheus => print!("{}", metrics.to_prometheus()),
    }

    Ok(())
}
