//! Round-robin load balancing strategy.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::load_balancer::destination::DestinationState;

/// Round-robin selector.
/// Remembers the last destination handed out and moves to the next id after
/// it, so the rotation follows destination ids. A destination dropping out of
/// the candidate set (or coming back) does not shift the others' turns.
#[derive(Debug, Default)]
pub struct RoundRobin {
    last: ArcSwapOption<DestinationState>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue the rotation of a previous snapshot's selector.
    pub fn resume_from(previous: &RoundRobin) -> Self {
        Self {
            last: ArcSwapOption::new(previous.last.load_full()),
        }
    }

    /// Pick from `candidates`, which must be ordered by id.
    pub fn pick(&self, candidates: &[Arc<DestinationState>]) -> Option<Arc<DestinationState>> {
        if candidates.is_empty() {
            return None;
        }
        let previous = self
            .last
            .rcu(|last| Some(next_after(candidates, last.as_deref()).clone()));
        Some(next_after(candidates, previous.as_deref()).clone())
    }
}

/// First candidate whose id sorts after `last`, wrapping to the start.
fn next_after<'a>(
    candidates: &'a [Arc<DestinationState>],
    last: Option<&DestinationState>,
) -> &'a Arc<DestinationState> {
    let index = match last {
        Some(last) => candidates.partition_point(|d| d.id() <= last.id()),
        None => 0,
    };
    candidates.get(index).unwrap_or(&candidates[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::DestinationConfig;

    fn destination(id: &str) -> Arc<DestinationState> {
        Arc::new(DestinationState::new(id, DestinationConfig::new("http://127.0.0.1:8080")).unwrap())
    }

    fn picks(lb: &RoundRobin, candidates: &[Arc<DestinationState>], n: usize) -> Vec<String> {
        (0..n).map(|_| lb.pick(candidates).unwrap().id().to_string()).collect()
    }

    #[test]
    fn test_round_robin_alternates() {
        let lb = RoundRobin::new();
        let candidates = vec![destination("a"), destination("b")];
        assert_eq!(picks(&lb, &candidates, 4), ["a", "b", "a", "b"]);
    }

    #[test]
    fn test_round_robin_skips_removed_destination_without_skew() {
        let lb = RoundRobin::new();
        let (a, b, c) = (destination("a"), destination("b"), destination("c"));
        let all = vec![a.clone(), b.clone(), c.clone()];
        assert_eq!(picks(&lb, &all, 2), ["a", "b"]);

        // b drops out after its turn; c is next, not a
        let without_b = vec![a.clone(), c.clone()];
        assert_eq!(picks(&lb, &without_b, 3), ["c", "a", "c"]);

        // b comes back and takes its turn in id order
        assert_eq!(picks(&lb, &all, 3), ["a", "b", "c"]);
        assert!(lb.pick(&[]).is_none());
    }

    #[test]
    fn test_round_robin_last_picked_removed() {
        let lb = RoundRobin::new();
        let all = vec![destination("a"), destination("b"), destination("c")];
        assert_eq!(picks(&lb, &all, 2), ["a", "b"]);

        // the destination just picked is gone; rotation continues after its id
        let without_b = vec![destination("a"), destination("c")];
        assert_eq!(picks(&lb, &without_b, 1), ["c"]);
    }

    #[test]
    fn test_resume_continues_rotation() {
        let lb = RoundRobin::new();
        let all = vec![destination("a"), destination("b"), destination("c")];
        assert_eq!(picks(&lb, &all, 1), ["a"]);

        let resumed = RoundRobin::resume_from(&lb);
        assert_eq!(picks(&resumed, &all, 3), ["b", "c", "a"]);
    }

    #[test]
    fn test_concurrent_picks_are_balanced() {
        let lb = Arc::new(RoundRobin::new());
        let candidates = Arc::new(vec![destination("a"), destination("b")]);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lb = lb.clone();
                let candidates = candidates.clone();
                std::thread::spawn(move || picks(&lb, &candidates, 1000))
            })
            .collect();
        let all: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let a = all.iter().filter(|id| *id == "a").count();
        assert_eq!(a, 2000);
    }
}
