use clap::Parser;
use simulator::MockCloud;
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Local mock of the feed, geocoding and elevation services.
#[derive(Debug, Parser)]
#[command(name = "simulator", version)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "SIM_LISTEN", default_value = "127.0.0.1:8099")]
    listen: SocketAddr,

    /// Require this value in the X-AIO-Key header.
    #[arg(long, env = "SIM_AIO_KEY")]
    aio_key: Option<String>,

    /// Fraction of requests answered with 503.
    #[arg(long, env = "SIM_FAILURE_RATE", default_value_t = 0.0)]
    failure_rate: f64,

    /// Elevation reported for every coordinate.
    #[arg(long, env = "SIM_ELEVATION", default_value_t = 100.0)]
    elevation: f64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    info!("Starting mock cloud");
    info!(
        "Listen: {}, failure rate: {}, elevation: {}",
        args.listen, args.failure_rate, args.elevation
    );

    let mut cloud = MockCloud::new();
    if let Some(key) = args.aio_key {
        cloud = cloud.with_aio_key(key);
    }
    cloud.set_failure_rate(args.failure_rate);
    cloud.set_elevation(Some(args.elevation));

    let listener = match tokio::net::TcpListener::bind(args.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", args.listen, e);
            std::process::exit(1);
        }
    };

    info!("Feed service:  http://{}/api/v2", args.listen);
    info!("Geocoding:     http://{}/positionstack/v1", args.listen);
    info!("Elevation:     http://{}/opentopodata/v1", args.listen);

    let server = axum::serve(listener, simulator::router(cloud.clone())).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Received shutdown signal");
    });

    if let Err(e) = server.await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    let counters = cloud.counters();
    info!(
        "Served {} requests ({} data points, {} geocode, {} elevation)",
        counters.requests, counters.data_points, counters.geocode_calls, counters.elevation_calls
    );
}
