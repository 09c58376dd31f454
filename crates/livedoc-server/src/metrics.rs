//! Metrics collection and export for livedoc.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use livedoc_core::{CloseReason, Hub, HubStats};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "livedoc_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "livedoc_connections_active";
    pub const CLOSES_TOTAL: &str = "livedoc_closes_total";
    pub const PUBLISHES_TOTAL: &str = "livedoc_publishes_total";
    pub const PUBLISH_BYTES: &str = "livedoc_publish_bytes";
    pub const CONTENT_CHANGES_TOTAL: &str = "livedoc_content_changes_total";
    pub const HUB_CONNECTIONS: &str = "livedoc_hub_connections";
    pub const HUB_ROUTES: &str = "livedoc_hub_routes";
    pub const HUB_BROADCASTS: &str = "livedoc_hub_broadcasts_total";
    pub const HUB_DELIVERIES: &str = "livedoc_hub_deliveries_total";
    pub const HUB_EVICTIONS: &str = "livedoc_hub_evictions_total";
    pub const ERRORS_TOTAL: &str = "livedoc_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of watch sessions since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open watch sessions"
    );
    metrics::describe_counter!(names::CLOSES_TOTAL, "Watch sessions ended, by reason");
    metrics::describe_counter!(names::PUBLISHES_TOTAL, "Updates accepted by the publish endpoint");
    metrics::describe_counter!(names::PUBLISH_BYTES, "Bytes accepted by the publish endpoint");
    metrics::describe_counter!(
        names::CONTENT_CHANGES_TOTAL,
        "Document changes picked up by the content watcher"
    );
    metrics::describe_gauge!(names::HUB_CONNECTIONS, "Connections registered with the hub");
    metrics::describe_gauge!(names::HUB_ROUTES, "Routes with at least one subscriber");
    metrics::describe_counter!(names::HUB_BROADCASTS, "Updates fanned out by the hub");
    metrics::describe_counter!(names::HUB_DELIVERIES, "Updates queued to subscribers");
    metrics::describe_counter!(names::HUB_EVICTIONS, "Subscribers dropped for falling behind");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new watch session.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record the end of a watch session.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record why a session's transport was closed.
pub fn record_close(reason: CloseReason) {
    counter!(names::CLOSES_TOTAL, "reason" => reason.as_str()).increment(1);
}

/// Record an update accepted for publishing.
pub fn record_publish(bytes: usize) {
    counter!(names::PUBLISHES_TOTAL).increment(1);
    counter!(names::PUBLISH_BYTES).increment(bytes as u64);
}

/// Record a document change seen by the content watcher.
pub fn record_content_change() {
    counter!(names::CONTENT_CHANGES_TOTAL).increment(1);
}

/// Mirror a hub snapshot into the exported metrics.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::HUB_CONNECTIONS).set(stats.connections as f64);
    gauge!(names::HUB_ROUTES).set(stats.routes as f64);
    counter!(names::HUB_BROADCASTS).absolute(stats.broadcasts);
    counter!(names::HUB_DELIVERIES).absolute(stats.deliveries);
    counter!(names::HUB_EVICTIONS).absolute(stats.evictions);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Periodically sample hub statistics until the hub stops.
pub async fn sample_hub_stats(hub: Hub, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match hub.stats().await {
            Ok(stats) => record_hub_stats(&stats),
            Err(e) => {
                debug!(error = %e, "Hub stats sampling stopped");
                break;
            }
        }
    }
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
