//! Active health checks against real sockets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proxy_core::config::{ClusterConfig, ProxyConfig};
use proxy_core::health::{ActiveHealth, ActiveHealthMonitor, HttpProbe};
use proxy_core::lifecycle::Shutdown;
use proxy_core::SnapshotStore;

mod common;

fn config(healthy: &str, failing: &str, interval_ms: u64) -> ProxyConfig {
    let mut cluster = ClusterConfig::new("web")
        .with_destination("healthy", &format!("http://{}", healthy))
        .with_destination("failing", &format!("http://{}", failing));
    cluster.health_check.active.enabled = true;
    cluster.health_check.active.interval_ms = interval_ms;
    cluster.health_check.active.timeout_ms = 500;
    cluster.health_check.active.path = Some("/health".into());
    let mut config = ProxyConfig::default();
    config.clusters.push(cluster);
    config
}

#[tokio::test]
async fn test_http_probe_marks_destinations() {
    let healthy = common::start_mock_backend(200).await;
    let failing = common::start_mock_backend(503).await;
    let store = Arc::new(SnapshotStore::from_config(&config(&healthy.to_string(), &failing.to_string(), 60_000)).unwrap());
    let monitor = ActiveHealthMonitor::new(store.clone(), HttpProbe::new("test-probe"));

    for _ in 0..3 {
        monitor.probe_all().await;
    }

    let snapshot = store.current();
    let cluster = snapshot.cluster("web").unwrap();
    assert_eq!(cluster.destination("healthy").unwrap().health().active(), ActiveHealth::Healthy);
    assert_eq!(cluster.destination("failing").unwrap().health().active(), ActiveHealth::Unhealthy);
    let available: Vec<_> = cluster.available_destinations().iter().map(|d| d.id().to_string()).collect();
    assert_eq!(available, ["healthy"]);
}

#[tokio::test]
async fn test_connection_refused_is_failure() {
    let healthy = common::start_mock_backend(200).await;
    let closed = common::closed_address().await;
    let store = Arc::new(SnapshotStore::from_config(&config(&healthy.to_string(), &closed.to_string(), 60_000)).unwrap());
    let monitor = ActiveHealthMonitor::new(store.clone(), HttpProbe::new("test-probe"));

    for _ in 0..3 {
        monitor.probe_all().await;
    }
    let snapshot = store.current();
    let failing = snapshot.cluster("web").unwrap().destination("failing").unwrap();
    assert_eq!(failing.health().active(), ActiveHealth::Unhealthy);
    assert_eq!(failing.health().consecutive_failures(), 3);
}

#[tokio::test]
async fn test_monitor_loop_recovers_destination() {
    let up = Arc::new(AtomicBool::new(false));
    let flag = up.clone();
    let flapping = common::start_programmable_backend(move || {
        let flag = flag.clone();
        async move {
            if flag.load(Ordering::SeqCst) {
                200
            } else {
                500
            }
        }
    })
    .await;
    let healthy = common::start_mock_backend(200).await;

    let store = Arc::new(SnapshotStore::from_config(&config(&healthy.to_string(), &flapping.to_string(), 50)).unwrap());
    let shutdown = Shutdown::new();
    let monitor = ActiveHealthMonitor::new(store.clone(), HttpProbe::new("test-probe"));
    let task = tokio::spawn(monitor.run(shutdown.subscribe()));

    let snapshot = store.current();
    let failing = snapshot.cluster("web").unwrap().destination("failing").unwrap().clone();
    wait_for(|| failing.health().active() == ActiveHealth::Unhealthy).await;

    up.store(true, Ordering::SeqCst);
    wait_for(|| failing.health().active() == ActiveHealth::Healthy).await;

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within 5s");
}
