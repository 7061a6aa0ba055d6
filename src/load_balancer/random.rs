//! Randomized load balancing strategies.

use std::sync::Arc;

use rand::Rng;

use crate::load_balancer::destination::DestinationState;

/// Uniform random pick.
#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn pick(&self, candidates: &[Arc<DestinationState>]) -> Option<Arc<DestinationState>> {
        if candidates.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[index].clone())
    }
}

/// Pick two distinct candidates at random and keep the less loaded one.
#[derive(Debug, Default)]
pub struct PowerOfTwoChoices;

impl PowerOfTwoChoices {
    pub fn pick(&self, candidates: &[Arc<DestinationState>]) -> Option<Arc<DestinationState>> {
        match candidates.len() {
            0 => None,
            1 => Some(candidates[0].clone()),
            len => {
                let mut rng = rand::thread_rng();
                let first = rng.gen_range(0..len);
                let mut second = rng.gen_range(0..len - 1);
                if second >= first {
                    second += 1;
                }
                let (a, b) = (&candidates[first.min(second)], &candidates[first.max(second)]);
                if b.concurrent_requests() < a.concurrent_requests() {
                    Some(b.clone())
                } else {
                    Some(a.clone())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::DestinationConfig;

    fn destination(id: &str) -> Arc<DestinationState> {
        Arc::new(DestinationState::new(id, DestinationConfig::new("http://127.0.0.1:8080")).unwrap())
    }

    #[test]
    fn test_random_covers_all() {
        let candidates = vec![destination("a"), destination("b"), destination("c")];
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(Random.pick(&candidates).unwrap().id().to_string());
        }
        assert_eq!(seen.len(), 3);
        assert!(Random.pick(&[]).is_none());
    }

    #[test]
    fn test_power_of_two_prefers_idle() {
        let busy = destination("busy");
        let idle = destination("idle");
        let _guards: Vec<_> = (0..5).map(|_| busy.begin_request()).collect();
        let candidates = vec![busy, idle];
        for _ in 0..20 {
            assert_eq!(PowerOfTwoChoices.pick(&candidates).unwrap().id(), "idle");
        }
    }
}
