use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::health::state::{ActiveHealth, PassiveHealth};
use crate::snapshot::ClusterState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub snapshot_version: u64,
    pub routes: usize,
    pub clusters: usize,
}

#[derive(Serialize)]
pub struct RouteStatus {
    pub id: String,
    pub cluster_id: String,
    pub order: i32,
    pub path: Option<String>,
    pub hosts: Option<Vec<String>>,
    pub methods: Option<Vec<String>>,
    pub transforms: usize,
    /// False while the route's cluster is missing from the snapshot.
    pub reachable: bool,
}

#[derive(Serialize)]
pub struct DestinationStatus {
    pub id: String,
    pub address: String,
    pub active: ActiveHealth,
    pub passive: PassiveHealth,
    pub available: bool,
    pub concurrent_requests: usize,
}

#[derive(Serialize)]
pub struct ClusterStatus {
    pub id: String,
    pub load_balancing_policy: &'static str,
    pub active_health_check: bool,
    pub passive_health_check: bool,
    pub session_affinity: Option<&'static str>,
    pub destinations: Vec<DestinationStatus>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let snapshot = state.store.current();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        snapshot_version: snapshot.version(),
        routes: snapshot.routes().len(),
        clusters: snapshot.clusters().count(),
    })
}

/// Routes in evaluation order.
pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<RouteStatus>> {
    let snapshot = state.store.current();
    let routes = snapshot
        .routes()
        .routes()
        .iter()
        .map(|route| {
            let config = route.config();
            RouteStatus {
                id: config.id.clone(),
                cluster_id: config.cluster_id.clone(),
                order: config.order,
                path: config.match_criteria.path.clone(),
                hosts: config.match_criteria.hosts.clone(),
                methods: config.match_criteria.methods.clone(),
                transforms: route.transforms().len(),
                reachable: snapshot.cluster(route.cluster_id()).is_some(),
            }
        })
        .collect();
    Json(routes)
}

/// Clusters ordered by id, each with live destination health.
pub async fn get_clusters(State(state): State<AdminState>) -> Json<Vec<ClusterStatus>> {
    let snapshot = state.store.current();
    let mut clusters: Vec<ClusterStatus> = snapshot.clusters().map(|c| cluster_status(c)).collect();
    clusters.sort_by(|a, b| a.id.cmp(&b.id));
    Json(clusters)
}

fn cluster_status(cluster: &ClusterState) -> ClusterStatus {
    ClusterStatus {
        id: cluster.id().to_string(),
        load_balancing_policy: cluster.load_balancer().name(),
        active_health_check: cluster.active_health().is_some(),
        passive_health_check: cluster.passive_health().is_some(),
        session_affinity: cluster.affinity().map(|policy| policy.carrier().name()),
        destinations: cluster
            .destinations()
            .map(|d| DestinationStatus {
                id: d.id().to_string(),
                address: d.address().to_string(),
                active: d.health().active(),
                passive: d.health().passive(),
                available: d.is_available(),
                concurrent_requests: d.concurrent_requests(),
            })
            .collect(),
    }
}
