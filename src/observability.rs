//! Observability for verge.
//!
//! Provides logging initialization and the Prometheus metrics endpoint.

use crate::config::ObservabilityConfig;
use crate::error::{Result, VergeError};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| VergeError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| VergeError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Run the Prometheus metrics server.
pub async fn run_metrics_server(config: ObservabilityConfig) -> Result<()> {
    let builder = PrometheusBuilder::new();

    let handle = builder
        .install_recorder()
        .map_err(|e| VergeError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();

    let app = axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/health", axum::routing::get(|| async { "OK" }));

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| VergeError::Network(e.to_string()))?;

    Ok(())
}

/// Register standard metrics.
fn register_metrics() {
    gauge!("verge_cache_entries").set(0.0);
    gauge!("verge_cache_bytes").set(0.0);

    counter!("verge_requests_total").absolute(0);
    counter!("verge_cache_hits_total").absolute(0);
    counter!("verge_cache_misses_total").absolute(0);
    counter!("verge_purges_total").absolute(0);
    counter!("verge_errors_total").absolute(0);
}

/// Record a delivered (or failed) request.
pub fn record_delivery(status: u16, cache_hit: bool) {
    counter!("verge_requests_total").increment(1);
    if status >= 400 {
        counter!("verge_errors_total", "status" => status.to_string()).increment(1);
    } else if cache_hit {
        counter!("verge_cache_hits_total").increment(1);
    } else {
        counter!("verge_cache_misses_total").increment(1);
    }
}

/// Record a purge applied on this node.
pub fn record_purge() {
    counter!("verge_purges_total").increment(1);
}

/// Publish cache occupancy gauges.
pub fn record_cache_occupancy(entries: u64, bytes: u64) {
    gauge!("verge_cache_entries").set(entries as f64);
    gauge!("verge_cache_bytes").set(bytes as f64);
}
