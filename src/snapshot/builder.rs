//! Compiles a `ProxyConfig` into a `ProxySnapshot`.
//!
//! Every problem is collected before failing so a rejected config reports
//! all of its errors at once. Destinations whose (cluster id, destination id,
//! address) are unchanged from the previous snapshot keep their runtime state
//! (health, in-flight counter), and a cluster keeping its round-robin policy
//! keeps its rotation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::affinity::AffinityPolicy;
use crate::config::schema::{ClusterConfig, ProxyConfig};
use crate::config::validation::ValidationError;
use crate::health::policy::{ActiveHealthPolicy, PassiveHealthPolicy};
use crate::load_balancer::destination::DestinationState;
use crate::load_balancer::LoadBalancer;
use crate::routing::{Route, RouteTable};
use crate::snapshot::model::{ActiveHealthSettings, ClusterState, PassiveHealthSettings, ProxySnapshot};

pub struct SnapshotBuilder<'a> {
    config: &'a ProxyConfig,
    previous: Option<&'a ProxySnapshot>,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(config: &'a ProxyConfig, previous: Option<&'a ProxySnapshot>) -> Self {
        Self { config, previous }
    }

    pub fn build(&self, version: u64) -> Result<ProxySnapshot, Vec<ValidationError>> {
        let mut errors = Vec::new();

        let mut clusters = HashMap::new();
        for cluster in &self.config.clusters {
            if cluster.id.is_empty() {
                errors.push(ValidationError::section("clusters", "cluster id must not be empty"));
                continue;
            }
            if clusters.contains_key(&cluster.id) {
                errors.push(ValidationError::cluster(&cluster.id, "duplicate cluster id"));
                continue;
            }
            match self.build_cluster(cluster) {
                Ok(state) => {
                    clusters.insert(cluster.id.clone(), Arc::new(state));
                }
                Err(mut cluster_errors) => {
                    errors.append(&mut cluster_errors);
                    // keep the id reserved so duplicates are still reported
                    clusters.insert(cluster.id.clone(), Arc::new(placeholder(cluster)));
                }
            }
        }

        let mut seen_routes = HashSet::new();
        let mut routes = Vec::new();
        for route in &self.config.routes {
            if route.id.is_empty() {
                errors.push(ValidationError::section("routes", "route id must not be empty"));
                continue;
            }
            if !seen_routes.insert(route.id.as_str()) {
                errors.push(ValidationError::route(&route.id, "duplicate route id"));
                continue;
            }
            if route.cluster_id.is_empty() {
                errors.push(ValidationError::route(&route.id, "cluster_id must not be empty"));
            }
            match Route::compile(route.clone()) {
                Ok(compiled) => routes.push(compiled),
                Err(route_errors) => errors.extend(
                    route_errors
                        .into_iter()
                        .map(|message| ValidationError::route(&route.id, message)),
                ),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(ProxySnapshot {
            version,
            routes: RouteTable::new(routes),
            clusters,
        })
    }

    fn build_cluster(&self, config: &ClusterConfig) -> Result<ClusterState, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let id = config.id.as_str();

        let previous = self.previous.and_then(|snapshot| snapshot.cluster(id));
        let load_balancer = LoadBalancer::from_name(config.load_balancing_policy.as_deref())
            .map(|lb| match previous {
                Some(cluster) => lb.resume_from(cluster.load_balancer()),
                None => lb,
            })
            .map_err(|e| errors.push(ValidationError::cluster(id, e)))
            .ok();

        let active = &config.health_check.active;
        let mut active_health = None;
        if active.enabled {
            if active.interval_ms == 0 {
                errors.push(ValidationError::cluster(id, "active health check interval must be positive"));
            }
            if active.timeout_ms == 0 {
                errors.push(ValidationError::cluster(id, "active health check timeout must be positive"));
            }
            if let Some(path) = active.path.as_deref().filter(|p| !p.starts_with('/')) {
                errors.push(ValidationError::cluster(
                    id,
                    format!("active health check path {:?} must start with '/'", path),
                ));
            }
            match ActiveHealthPolicy::resolve(active.policy.as_deref(), &config.metadata) {
                Ok(policy) => {
                    active_health = Some(ActiveHealthSettings {
                        interval: Duration::from_millis(active.interval_ms),
                        timeout: Duration::from_millis(active.timeout_ms),
                        policy,
                        path: active.path.clone(),
                        query: active.query.clone(),
                    })
                }
                Err(e) => errors.push(ValidationError::cluster(id, e)),
            }
        }

        let passive = &config.health_check.passive;
        let mut passive_health = None;
        if passive.enabled {
            match PassiveHealthPolicy::resolve(passive.policy.as_deref(), &config.metadata, &self.config.health_check)
            {
                Ok(policy) => {
                    passive_health = Some(PassiveHealthSettings {
                        policy,
                        reactivation_period: Duration::from_millis(passive.reactivation_period_ms),
                    })
                }
                Err(e) => errors.push(ValidationError::cluster(id, e)),
            }
        }

        let affinity = match config.session_affinity.as_ref().map(AffinityPolicy::compile) {
            None => None,
            Some(Ok(policy)) => policy,
            Some(Err(affinity_errors)) => {
                errors.extend(affinity_errors.into_iter().map(|e| ValidationError::cluster(id, e)));
                None
            }
        };

        let mut destinations = BTreeMap::new();
        for (destination_id, destination) in &config.destinations {
            if destination_id.is_empty() {
                errors.push(ValidationError::cluster(id, "destination id must not be empty"));
                continue;
            }
            let carried = previous
                .and_then(|cluster| cluster.destination(destination_id))
                .filter(|prev| prev.config().address == destination.address);
            let state = match carried {
                Some(prev) => DestinationState::carry_forward(destination_id.as_str(), destination.clone(), prev),
                None => DestinationState::new(destination_id.as_str(), destination.clone()),
            };
            match state {
                Ok(state) => {
                    destinations.insert(destination_id.clone(), Arc::new(state));
                }
                Err(e) => errors.push(ValidationError::destination(id, destination_id, e)),
            }
        }

        match load_balancer {
            Some(load_balancer) if errors.is_empty() => Ok(ClusterState {
                config: config.clone(),
                load_balancer,
                active_health,
                passive_health,
                affinity,
                destinations,
            }),
            _ => Err(errors),
        }
    }
}

fn placeholder(config: &ClusterConfig) -> ClusterState {
    ClusterState {
        config: config.clone(),
        load_balancer: LoadBalancer::First,
        active_health: None,
        passive_health: None,
        affinity: None,
        destinations: BTreeMap::new(),
    }
}
