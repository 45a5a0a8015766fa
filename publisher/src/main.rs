mod aio;
mod config;
mod errors;
mod feeds;
mod geo;
mod http;
mod location;
mod metrics;
mod model;
mod poll;
mod sensors;
mod shutdown;
mod telemetry;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use clap::Parser;
use poll::PollLoop;
use shutdown::{SignalListener, StopCause};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Publish local sensor readings to a cloud feed service.
#[derive(Debug, Parser)]
#[command(name = "publisher", version)]
struct Args {
    /// Settings file.
    #[arg(long, env = "PUBLISHER_CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Diagnostics go to stderr only
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(cause) => {
            info!("Stopped ({})", cause);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<StopCause> {
    info!("Starting sensor publisher");

    let config = config::load(&args.config)
        .with_context(|| format!("Failed to load settings from {}", args.config.display()))?;
    config.log_summary();

    metrics::init_metrics().context("Failed to register metrics")?;
    if let Some(addr) = config.metrics_listen {
        tokio::spawn(metrics::serve(addr));
    }

    let sensors = sensors::build_all(&config.sensors).context("Failed to set up sensors")?;

    let (trigger, shutdown) = shutdown::channel();
    let listener = SignalListener::install().context("Failed to install signal handlers")?;
    tokio::spawn(listener.run(trigger));

    info!("Resolving location and feeds");
    let mut poll = tokio::select! {
        biased;
        cause = shutdown.triggered() => {
            info!("Stopped during startup ({})", cause);
            return Ok(cause);
        }
        result = PollLoop::init(&config, sensors) => result.context("Startup failed")?,
    };

    Ok(poll.run(&shutdown).await)
}
