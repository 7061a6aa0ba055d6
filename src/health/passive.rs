//! Passive health checking.
//!
//! # Responsibilities
//! - Receive outcomes of forwarded requests
//! - Feed them to the cluster's passive policy
//! - Mark destinations passively unhealthy for the reactivation period

use std::sync::Arc;
use std::time::Instant;

use crate::load_balancer::destination::DestinationState;
use crate::observability::metrics;
use crate::snapshot::{ClusterState, SnapshotStore};

/// How a forwarded request ended, as reported by the forwarding collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The destination produced a response (any status).
    Success,
    /// Connect, TLS, or protocol failure talking to the destination.
    TransportFailure,
    /// The client went away; says nothing about the destination.
    Canceled,
}

/// Applies passive policies to reported outcomes.
pub struct PassiveHealthMonitor {
    store: Arc<SnapshotStore>,
}

impl PassiveHealthMonitor {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    /// Report an outcome by id against the current snapshot. Returns false if
    /// the cluster or destination no longer exists.
    pub fn report(&self, cluster_id: &str, destination_id: &str, outcome: ForwardOutcome) -> bool {
        let snapshot = self.store.current();
        let Some(cluster) = snapshot.cluster(cluster_id) else {
            return false;
        };
        let Some(destination) = cluster.destination(destination_id) else {
            return false;
        };
        self.report_outcome(cluster, destination, outcome);
        true
    }

    /// Report an outcome for a destination already in hand.
    pub fn report_outcome(&self, cluster: &ClusterState, destination: &DestinationState, outcome: ForwardOutcome) {
        let Some(settings) = cluster.passive_health() else {
            return;
        };
        let failed = match outcome {
            ForwardOutcome::Success => false,
            ForwardOutcome::TransportFailure => true,
            ForwardOutcome::Canceled => return,
        };

        let health = destination.health();
        if !settings.policy.evaluate(health, failed, Instant::now()) {
            return;
        }
        if health.mark_passive_unhealthy(settings.reactivation_period) {
            tracing::warn!(
                cluster = %cluster.id(),
                destination = %destination.id(),
                policy = settings.policy.name(),
                reactivation = ?settings.reactivation_period,
                "Destination marked passively unhealthy"
            );
            metrics::record_destination_health(cluster.id(), destination.id(), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ClusterConfig, ProxyConfig};
    use crate::health::state::PassiveHealth;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::time::Duration;

    fn store(reactivation_ms: u64) -> Arc<SnapshotStore> {
        let mut cluster = ClusterConfig::new("c1").with_destination("d1", "http://127.0.0.1:7001");
        cluster.health_check.passive.enabled = true;
        cluster.health_check.passive.reactivation_period_ms = reactivation_ms;
        cluster
            .metadata
            .insert("TransportFailureRateHealthPolicy.RateLimit".into(), "0.5".into());
        let mut config = ProxyConfig::default();
        config.health_check.passive_minimal_total_count = 4;
        config.clusters.push(cluster);
        Arc::new(SnapshotStore::from_config(&config).unwrap())
    }

    #[test]
    fn test_failure_rate_marks_unhealthy() {
        let store = store(60_000);
        let monitor = PassiveHealthMonitor::new(store.clone());

        assert!(monitor.report("c1", "d1", ForwardOutcome::Success));
        assert!(monitor.report("c1", "d1", ForwardOutcome::TransportFailure));
        assert!(monitor.report("c1", "d1", ForwardOutcome::TransportFailure));
        let snapshot = store.current();
        let d1 = snapshot.cluster("c1").unwrap().destination("d1").unwrap();
        // three samples, below the minimum
        assert_eq!(d1.health().passive(), PassiveHealth::Healthy);

        monitor.report("c1", "d1", ForwardOutcome::TransportFailure);
        assert_eq!(d1.health().passive(), PassiveHealth::Unhealthy);
        assert!(!d1.is_available());
    }

    #[test]
    fn test_canceled_is_ignored_and_unknown_ids_reported() {
        let store = store(60_000);
        let monitor = PassiveHealthMonitor::new(store.clone());
        for _ in 0..10 {
            monitor.report("c1", "d1", ForwardOutcome::Canceled);
        }
        let snapshot = store.current();
        assert!(snapshot.cluster("c1").unwrap().destination("d1").unwrap().is_available());
        assert!(!monitor.report("c1", "nope", ForwardOutcome::Success));
        assert!(!monitor.report("nope", "d1", ForwardOutcome::Success));
    }

    #[test]
    fn test_reactivates_after_period() {
        let store = store(30);
        let monitor = PassiveHealthMonitor::new(store.clone());
        for _ in 0..4 {
            monitor.report("c1", "d1", ForwardOutcome::TransportFailure);
        }
        let snapshot = store.current();
        let d1 = snapshot.cluster("c1").unwrap().destination("d1").unwrap();
        assert!(!d1.is_available());
        std::thread::sleep(Duration::from_millis(60));
        assert!(d1.is_available());
        assert_eq!(d1.health().passive(), PassiveHealth::Healthy);
    }

    fn health_gauge(rendered: &str, destination: &str) -> Option<f64> {
        let label = format!("destination=\"{}\"", destination);
        rendered
            .lines()
            .find(|line| line.starts_with("proxy_destination_health{") && line.contains(&label))
            .and_then(|line| line.rsplit(' ').next())
            .and_then(|value| value.parse().ok())
    }

    #[test]
    fn test_reactivation_restores_health_gauge() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let store = store(30);
        let monitor = PassiveHealthMonitor::new(store.clone());
        let snapshot = store.current();
        let cluster = snapshot.cluster("c1").unwrap();

        ::metrics::with_local_recorder(&recorder, || {
            for _ in 0..4 {
                monitor.report("c1", "d1", ForwardOutcome::TransportFailure);
            }
        });
        assert_eq!(health_gauge(&handle.render(), "d1"), Some(0.0));

        std::thread::sleep(Duration::from_millis(60));
        let available = ::metrics::with_local_recorder(&recorder, || cluster.available_destinations());
        assert_eq!(available.len(), 1);
        assert_eq!(health_gauge(&handle.render(), "d1"), Some(1.0));
    }
}
