//! Least-requests load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::destination::DestinationState;

/// Selects the destination with the fewest in-flight requests.
#[derive(Debug, Default)]
pub struct LeastRequests;

impl LeastRequests {
    pub fn new() -> Self {
        Self
    }

    pub fn pick(&self, candidates: &[Arc<DestinationState>]) -> Option<Arc<DestinationState>> {
        // min_by_key keeps the first minimum, and candidates are id ordered,
        // so ties go to the lowest id.
        candidates
            .iter()
            .min_by_key(|d| d.concurrent_requests())
            .cloned()
    }
}
