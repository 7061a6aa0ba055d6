//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (publishes, health, probes, picks, affinity)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-cluster and per-destination metrics
//!
//! # Metrics
//! - `proxy_config_publish_total` (counter): publishes by result
//! - `proxy_snapshot_version` (gauge): version of the active snapshot
//! - `proxy_destination_health` (gauge): 1=available, 0=unavailable
//! - `proxy_health_probe_total` (counter): probes by cluster and result
//! - `proxy_destination_picks_total` (counter): picks by cluster and policy
//! - `proxy_affinity_total` (counter): affinity lookups by cluster and status
//!
//! # Design Decisions
//! - Low-overhead metric updates through the `metrics` facade
//! - Without an installed recorder every call is a no-op

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics recorder"),
    }
}

pub fn record_config_publish(result: &'static str) {
    counter!("proxy_config_publish_total", "result" => result).increment(1);
}

pub fn set_snapshot_version(version: u64) {
    gauge!("proxy_snapshot_version").set(version as f64);
}

pub fn record_destination_health(cluster: &str, destination: &str, available: bool) {
    gauge!(
        "proxy_destination_health",
        "cluster" => cluster.to_string(),
        "destination" => destination.to_string()
    )
    .set(if available { 1.0 } else { 0.0 });
}

pub fn record_probe(cluster: &str, result: &'static str) {
    counter!("proxy_health_probe_total", "cluster" => cluster.to_string(), "result" => result).increment(1);
}

pub fn record_pick(cluster: &str, policy: &'static str) {
    counter!("proxy_destination_picks_total", "cluster" => cluster.to_string(), "policy" => policy).increment(1);
}

pub fn record_affinity(cluster: &str, status: &'static str) {
    counter!("proxy_affinity_total", "cluster" => cluster.to_string(), "status" => status).increment(1);
}
