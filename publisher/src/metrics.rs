use crate::errors::Result;
use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_PUBLISHED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "publisher_readings_published_total",
        "Readings accepted by the feed service"
    ))
    .unwrap();
    pub static ref READINGS_DROPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "publisher_readings_dropped_total",
        "Readings dropped after the retry budget was spent"
    ))
    .unwrap();
    pub static ref SENSOR_ERRORS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "publisher_sensor_errors_total",
        "Failed sensor reads"
    ))
    .unwrap();
    pub static ref HTTP_RETRIES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "publisher_http_retries_total",
        "HTTP attempts that were retried after a transient failure"
    ))
    .unwrap();
    pub static ref CYCLE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "publisher_cycle_duration_seconds",
            "Time taken to read and publish all sensors once"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0])
    )
    .unwrap();
}

pub fn init_metrics() -> Result<()> {
    REGISTRY.register(Box::new(READINGS_PUBLISHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READINGS_DROPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SENSOR_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HTTP_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CYCLE_DURATION_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

async fn metrics_handler() -> String {
    gather_metrics()
}

pub fn router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serve `/metrics` on `addr` until the process exits. Failures are logged only.
pub async fn serve(addr: SocketAddr) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind metrics endpoint to {}: {}", addr, e);
            return;
        }
    };

    info!("Metrics available at http://{}/metrics", addr);
    if let Err(e) = axum::serve(listener, router()).await {
        error!("Metrics server error: {}", e);
    }
}
