//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → cluster resolved
//!     → ClusterState::available_destinations (health filtered, id ordered)
//!     → session affinity may narrow the set to one destination
//!     → LoadBalancer::pick applies the cluster's policy:
//!         - round_robin.rs (rotate through destinations)
//!         - least_requests.rs (fewest in-flight requests)
//!         - random.rs (uniform random, power of two choices)
//!     → destination.rs (RequestGuard tracks the in-flight request)
//! ```
//!
//! # Design Decisions
//! - Policy names are resolved to a `LoadBalancer` variant once per snapshot
//! - Per-cluster selector state is lock-free; `pick` never blocks
//! - Round-robin position survives a reload of the same cluster
//! - Unhealthy destinations are excluded before `pick` is called
//! - An empty candidate set is `None`, never a retry

pub mod destination;
pub mod least_requests;
pub mod random;
pub mod round_robin;

use std::sync::Arc;

use self::destination::DestinationState;
use self::least_requests::LeastRequests;
use self::random::{PowerOfTwoChoices, Random};
use self::round_robin::RoundRobin;

/// Policy used when a cluster does not name one.
pub const DEFAULT_POLICY: &str = "PowerOfTwoChoices";

/// A cluster's load balancing policy together with its per-cluster state.
#[derive(Debug)]
pub enum LoadBalancer {
    /// Always the first candidate (lowest id).
    First,
    Random(Random),
    RoundRobin(RoundRobin),
    LeastRequests(LeastRequests),
    PowerOfTwoChoices(PowerOfTwoChoices),
}

impl LoadBalancer {
    /// Resolve a policy name; `None` selects the default policy.
    pub fn from_name(name: Option<&str>) -> Result<Self, String> {
        Ok(match name.unwrap_or(DEFAULT_POLICY) {
            "First" => Self::First,
            "Random" => Self::Random(Random),
            "RoundRobin" => Self::RoundRobin(RoundRobin::new()),
            "LeastRequests" => Self::LeastRequests(LeastRequests::new()),
            "PowerOfTwoChoices" => Self::PowerOfTwoChoices(PowerOfTwoChoices),
            other => return Err(format!("unknown load balancing policy {:?}", other)),
        })
    }

    /// Policy name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::First => "First",
            Self::Random(_) => "Random",
            Self::RoundRobin(_) => "RoundRobin",
            Self::LeastRequests(_) => "LeastRequests",
            Self::PowerOfTwoChoices(_) => "PowerOfTwoChoices",
        }
    }

    /// Keep the previous snapshot's rotation when the policy is unchanged.
    pub fn resume_from(self, previous: &LoadBalancer) -> Self {
        match (self, previous) {
            (Self::RoundRobin(_), Self::RoundRobin(prev)) => Self::RoundRobin(RoundRobin::resume_from(prev)),
            (lb, _) => lb,
        }
    }

    /// Pick one destination from `candidates` (id ordered).
    pub fn pick(&self, candidates: &[Arc<DestinationState>]) -> Option<Arc<DestinationState>> {
        match self {
            Self::First => candidates.first().cloned(),
            Self::Random(lb) => lb.pick(candidates),
            Self::RoundRobin(lb) => lb.pick(candidates),
            Self::LeastRequests(lb) => lb.pick(candidates),
            Self::PowerOfTwoChoices(lb) => lb.pick(candidates),
        }
    }
}
