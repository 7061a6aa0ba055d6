//! Per-request decision pipeline.
//!
//! # Responsibilities
//! - Match the request to a route against one snapshot
//! - Build the outgoing request through the route's transforms
//! - Honour an existing affinity binding, otherwise load balance
//! - After forwarding: report passive health, bind affinity, run response
//!   and trailer transforms
//!
//! # Design Decisions
//! - `route` and `complete` never block; the network call in between belongs
//!   to the forwarding collaborator
//! - A `ForwardPlan` pins its snapshot, so a concurrent publish cannot change
//!   the route or cluster a request is using
//! - The plan owns the destination's in-flight guard

use std::sync::Arc;

use axum::http::{Method, StatusCode, Uri};
use thiserror::Error;

use crate::affinity::{AffinityResult, AffinityStatus, FailurePolicy, KeyProtector, SessionAffinity};
use crate::health::passive::{ForwardOutcome, PassiveHealthMonitor};
use crate::http::request::{OutgoingRequest, ProxyRequest};
use crate::http::response::ProxyResponse;
use crate::load_balancer::destination::{DestinationState, RequestGuard};
use crate::observability::metrics;
use crate::routing::{Route, RouteValues};
use crate::snapshot::{ClusterState, ProxySnapshot, SnapshotStore};

/// Why a request could not be assigned a destination.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no route matches {method} {path}")]
    RouteNotFound { method: Method, path: String },

    #[error("cluster '{0}' has no available destination")]
    NoAvailableDestination(String),

    #[error("session affinity failed for cluster '{cluster}': {status:?}")]
    AffinityFailure { cluster: String, status: AffinityStatus },
}

impl ProxyError {
    /// Status the listener should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ProxyError::NoAvailableDestination(_) | ProxyError::AffinityFailure { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

/// Everything the forwarding collaborator needs for one request.
#[derive(Debug)]
pub struct ForwardPlan {
    snapshot: Arc<ProxySnapshot>,
    route: Arc<Route>,
    cluster: Arc<ClusterState>,
    route_values: RouteValues,
    affinity: Option<AffinityResult>,
    guard: RequestGuard,
    /// The transformed request to send.
    pub request: OutgoingRequest,
}

impl ForwardPlan {
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot.version()
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn cluster(&self) -> &ClusterState {
        &self.cluster
    }

    pub fn route_values(&self) -> &RouteValues {
        &self.route_values
    }

    pub fn destination(&self) -> &Arc<DestinationState> {
        self.guard.destination()
    }

    /// Affinity lookup result, `None` when the cluster has no affinity.
    pub fn affinity(&self) -> Option<&AffinityResult> {
        self.affinity.as_ref()
    }

    /// Absolute URI of the outgoing request on the chosen destination.
    pub fn uri(&self) -> Result<Uri, String> {
        self.request.uri_for(self.destination().address())
    }
}

/// The decision core, shared by all requests.
pub struct ProxyPipeline {
    store: Arc<SnapshotStore>,
    affinity: SessionAffinity,
    passive: PassiveHealthMonitor,
}

impl ProxyPipeline {
    pub fn new(store: Arc<SnapshotStore>, protector: KeyProtector) -> Self {
        Self {
            passive: PassiveHealthMonitor::new(store.clone()),
            affinity: SessionAffinity::new(protector),
            store,
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Decide where `request` goes.
    pub fn route(&self, request: &ProxyRequest) -> Result<ForwardPlan, ProxyError> {
        let snapshot = self.store.current();
        let Some(matched) = snapshot.match_request(request) else {
            tracing::debug!(method = %request.method, path = %request.path, "No route matched");
            return Err(ProxyError::RouteNotFound {
                method: request.method.clone(),
                path: request.path.clone(),
            });
        };
        let route = matched.route;
        let cluster = matched.cluster;

        let outgoing = route.transforms().apply_request(request, &matched.values);
        let candidates = cluster.available_destinations();

        let mut affinity = None;
        let mut chosen = None;
        if let Some(policy) = cluster.affinity() {
            let result = self
                .affinity
                .find_affinitized_destinations(request, &candidates, cluster.id(), policy);
            match result.status {
                AffinityStatus::Ok => chosen = result.destinations.first().cloned(),
                AffinityStatus::AffinityKeyNotSet => {}
                status @ (AffinityStatus::AffinityKeyExtractionFailed | AffinityStatus::DestinationNotFound) => {
                    if policy.failure_policy() == FailurePolicy::Return503 {
                        return Err(ProxyError::AffinityFailure {
                            cluster: cluster.id().to_string(),
                            status,
                        });
                    }
                }
            }
            affinity = Some(result);
        }

        let destination = match chosen {
            Some(destination) => destination,
            None => {
                let load_balancer = cluster.load_balancer();
                let picked = load_balancer
                    .pick(&candidates)
                    .ok_or_else(|| ProxyError::NoAvailableDestination(cluster.id().to_string()))?;
                metrics::record_pick(cluster.id(), load_balancer.name());
                picked
            }
        };

        tracing::debug!(
            route = %route.id(),
            cluster = %cluster.id(),
            destination = %destination.id(),
            path = %outgoing.path,
            "Request routed"
        );

        Ok(ForwardPlan {
            guard: destination.begin_request(),
            snapshot,
            route,
            cluster,
            route_values: matched.values,
            affinity,
            request: outgoing,
        })
    }

    /// Finish a request: passive health, affinity binding, response and
    /// trailer transforms. `response` is `None` when no response arrived.
    pub fn complete(&self, plan: ForwardPlan, outcome: ForwardOutcome, response: Option<&mut ProxyResponse>) {
        let destination = plan.destination();
        self.passive.report_outcome(&plan.cluster, destination, outcome);

        let Some(response) = response else {
            return;
        };
        let transforms = plan.route.transforms();
        if !transforms.copies_response_headers() {
            response.headers.clear();
        }
        if !transforms.copies_response_trailers() {
            response.trailers.clear();
        }
        if let Some(policy) = plan.cluster.affinity() {
            self.affinity
                .affinitize_response(&mut response.headers, policy, plan.affinity.as_ref(), destination);
        }
        transforms.apply_response(response);
        transforms.apply_trailers(response);
    }
}
