//! Immutable snapshot types.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::affinity::AffinityPolicy;
use crate::config::schema::ClusterConfig;
use crate::health::policy::{ActiveHealthPolicy, PassiveHealthPolicy};
use crate::http::ProxyRequest;
use crate::load_balancer::destination::DestinationState;
use crate::load_balancer::LoadBalancer;
use crate::observability::metrics;
use crate::routing::{Route, RouteTable, RouteValues};

/// Resolved active probing settings for a cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveHealthSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub policy: ActiveHealthPolicy,
    pub path: Option<String>,
    pub query: Option<String>,
}

/// Resolved passive health settings for a cluster.
#[derive(Debug, Clone)]
pub struct PassiveHealthSettings {
    pub policy: PassiveHealthPolicy,
    pub reactivation_period: Duration,
}

/// A cluster compiled for one snapshot.
#[derive(Debug)]
pub struct ClusterState {
    pub(crate) config: ClusterConfig,
    pub(crate) load_balancer: LoadBalancer,
    pub(crate) active_health: Option<ActiveHealthSettings>,
    pub(crate) passive_health: Option<PassiveHealthSettings>,
    pub(crate) affinity: Option<AffinityPolicy>,
    pub(crate) destinations: BTreeMap<String, Arc<DestinationState>>,
}

impl ClusterState {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn load_balancer(&self) -> &LoadBalancer {
        &self.load_balancer
    }

    /// `None` when active probing is disabled.
    pub fn active_health(&self) -> Option<&ActiveHealthSettings> {
        self.active_health.as_ref()
    }

    /// `None` when passive observation is disabled.
    pub fn passive_health(&self) -> Option<&PassiveHealthSettings> {
        self.passive_health.as_ref()
    }

    /// `None` when session affinity is disabled.
    pub fn affinity(&self) -> Option<&AffinityPolicy> {
        self.affinity.as_ref()
    }

    pub fn destination(&self, id: &str) -> Option<&Arc<DestinationState>> {
        self.destinations.get(id)
    }

    /// All destinations, ordered by id.
    pub fn destinations(&self) -> impl Iterator<Item = &Arc<DestinationState>> {
        self.destinations.values()
    }

    /// Destinations not marked unhealthy by either signal, ordered by id.
    /// Commits any lapsed passive ejection it comes across.
    pub fn available_destinations(&self) -> Vec<Arc<DestinationState>> {
        self.destinations
            .values()
            .filter(|d| {
                let available = d.is_available();
                if d.health().refresh_passive() {
                    tracing::info!(
                        cluster = %self.id(),
                        destination = %d.id(),
                        "Destination passive health reactivated"
                    );
                    metrics::record_destination_health(self.id(), d.id(), available);
                }
                available
            })
            .cloned()
            .collect()
    }
}

/// Result of matching a request against a snapshot.
#[derive(Debug, Clone)]
pub struct RouteMatchResult {
    pub route: Arc<Route>,
    pub cluster: Arc<ClusterState>,
    pub values: RouteValues,
}

/// An immutable, versioned view of the whole topology.
#[derive(Debug, Default)]
pub struct ProxySnapshot {
    pub(crate) version: u64,
    pub(crate) routes: RouteTable,
    pub(crate) clusters: HashMap<String, Arc<ClusterState>>,
}

impl ProxySnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn cluster(&self, id: &str) -> Option<&Arc<ClusterState>> {
        self.clusters.get(id)
    }

    /// All clusters, in no particular order.
    pub fn clusters(&self) -> impl Iterator<Item = &Arc<ClusterState>> {
        self.clusters.values()
    }

    /// First matching route whose cluster exists in this snapshot.
    pub fn match_request(&self, request: &ProxyRequest) -> Option<RouteMatchResult> {
        let (route, values) = self
            .routes
            .find(request, |cluster_id| self.clusters.contains_key(cluster_id))?;
        let cluster = self.clusters.get(route.cluster_id())?.clone();
        Some(RouteMatchResult {
            route: route.clone(),
            cluster,
            values,
        })
    }
}
