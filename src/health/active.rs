//! Active health checking.
//!
//! # Responsibilities
//! - Run one probe loop per cluster with active checks enabled
//! - Probe every destination of the cluster concurrently, each bounded by
//!   the cluster's timeout
//! - Fold results through the cluster's active policy into destination health
//! - Restart or stop loops when a new snapshot changes the settings

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode, Uri};
use dashmap::DashMap;
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::health::state::ActiveHealth;
use crate::observability::metrics;
use crate::snapshot::{ActiveHealthSettings, ClusterState, ProxySnapshot, SnapshotStore};

/// Why a probe did not produce a status code.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe request failed: {0}")]
    Request(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}

/// Sends one probe and reports the response status.
pub trait HealthProbe: Send + Sync + 'static {
    fn probe(&self, uri: Uri) -> impl Future<Output = Result<StatusCode, ProbeError>> + Send;
}

/// HTTP GET prober.
pub struct HttpProbe {
    client: Client<HttpConnector, Body>,
    user_agent: HeaderValue,
}

impl HttpProbe {
    pub fn new(user_agent: &str) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let user_agent = HeaderValue::from_str(user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static("proxy-core-health-check"));
        Self { client, user_agent }
    }
}

impl HealthProbe for HttpProbe {
    async fn probe(&self, uri: Uri) -> Result<StatusCode, ProbeError> {
        let request = Request::get(uri)
            .header(header::USER_AGENT, self.user_agent.clone())
            .body(Body::empty())
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        Ok(response.status())
    }
}

struct ClusterProbeTask {
    settings: ActiveHealthSettings,
    handle: JoinHandle<()>,
}

/// Keeps one probe loop running per actively checked cluster.
pub struct ActiveHealthMonitor<P: HealthProbe = HttpProbe> {
    store: Arc<SnapshotStore>,
    prober: Arc<P>,
    tasks: DashMap<String, ClusterProbeTask>,
}

impl<P: HealthProbe> ActiveHealthMonitor<P> {
    pub fn new(store: Arc<SnapshotStore>, prober: P) -> Self {
        Self {
            store,
            prober: Arc::new(prober),
            tasks: DashMap::new(),
        }
    }

    /// Follow published snapshots until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut snapshots = self.store.subscribe();
        self.sync(&self.store.current());
        tracing::info!(clusters = self.tasks.len(), "Active health monitor starting");

        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    self.sync(&snapshot);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Active health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Start, restart or stop probe loops to match `snapshot`.
    pub fn sync(&self, snapshot: &ProxySnapshot) {
        self.tasks.retain(|cluster_id, task| {
            let keep = snapshot
                .cluster(cluster_id)
                .and_then(|cluster| cluster.active_health())
                .is_some_and(|settings| *settings == task.settings && !task.handle.is_finished());
            if !keep {
                task.handle.abort();
                tracing::debug!(cluster = %cluster_id, "Stopped probe loop");
            }
            keep
        });

        for cluster in snapshot.clusters() {
            let Some(settings) = cluster.active_health() else {
                continue;
            };
            if self.tasks.contains_key(cluster.id()) {
                continue;
            }
            let handle = tokio::spawn(probe_loop(
                self.store.clone(),
                self.prober.clone(),
                cluster.id().to_string(),
                settings.interval,
            ));
            tracing::info!(
                cluster = %cluster.id(),
                interval = ?settings.interval,
                timeout = ?settings.timeout,
                policy = settings.policy.name(),
                "Started probe loop"
            );
            self.tasks.insert(
                cluster.id().to_string(),
                ClusterProbeTask {
                    settings: settings.clone(),
                    handle,
                },
            );
        }
    }

    /// Ids of clusters with a running probe loop.
    pub fn probed_clusters(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Probe every actively checked cluster of the current snapshot once.
    pub async fn probe_all(&self) {
        let snapshot = self.store.current();
        let checks = snapshot.clusters().map(|cluster| probe_cluster(&*self.prober, cluster));
        join_all(checks).await;
    }
}

impl<P: HealthProbe> Drop for ActiveHealthMonitor<P> {
    fn drop(&mut self) {
        for task in self.tasks.iter() {
            task.handle.abort();
        }
    }
}

async fn probe_loop<P: HealthProbe>(
    store: Arc<SnapshotStore>,
    prober: Arc<P>,
    cluster_id: String,
    interval: Duration,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let snapshot = store.current();
        let Some(cluster) = snapshot.cluster(&cluster_id) else {
            tracing::debug!(cluster = %cluster_id, "Cluster removed, probe loop exiting");
            break;
        };
        probe_cluster(&*prober, cluster).await;
    }
}

/// Probe all destinations of `cluster` concurrently and apply the results.
/// Does nothing if the cluster has active checks disabled.
pub async fn probe_cluster<P: HealthProbe>(prober: &P, cluster: &ClusterState) {
    let Some(settings) = cluster.active_health() else {
        return;
    };

    let probes = cluster.destinations().map(|destination| async move {
        let uri = match destination.probe_uri(settings.path.as_deref(), settings.query.as_deref()) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(cluster = %cluster.id(), destination = %destination.id(), error = %e, "Cannot build probe uri");
                return;
            }
        };

        let result = match time::timeout(settings.timeout, prober.probe(uri.clone())).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(settings.timeout)),
        };
        let passed = match &result {
            Ok(status) if status.is_success() => true,
            Ok(status) => {
                tracing::warn!(cluster = %cluster.id(), destination = %destination.id(), status = %status, "Health check failed: non-success status");
                false
            }
            Err(e) => {
                tracing::warn!(cluster = %cluster.id(), destination = %destination.id(), uri = %uri, error = %e, "Health check failed");
                false
            }
        };
        metrics::record_probe(cluster.id(), if passed { "success" } else { "failure" });

        let health = destination.health();
        let next = settings.policy.evaluate(health, passed);
        if health.set_active(next) {
            match next {
                ActiveHealth::Unhealthy => tracing::warn!(
                    cluster = %cluster.id(),
                    destination = %destination.id(),
                    failures = health.consecutive_failures(),
                    "Destination marked actively unhealthy"
                ),
                _ => tracing::info!(
                    cluster = %cluster.id(),
                    destination = %destination.id(),
                    state = ?next,
                    "Destination active health changed"
                ),
            }
            metrics::record_destination_health(cluster.id(), destination.id(), destination.is_available());
        }
    });
    join_all(probes).await;
}
