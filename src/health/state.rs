//! Destination health state.
//!
//! # States
//! - Active: Unknown | Healthy | Unhealthy (driven by probes)
//! - Passive: Healthy | Unhealthy (driven by observed traffic)
//!
//! # State Transitions
//! ```text
//! Active  Unknown/Healthy → Unhealthy: active policy verdict on failed probes
//! Active  any → Healthy:               a passing probe
//! Passive Healthy → Unhealthy:         passive policy verdict
//! Passive Unhealthy → Healthy:         reactivation period elapsed
//! ```
//!
//! # Design Decisions
//! - Every field is an atomic, so readers in `pick` never block
//! - Unknown counts as available so a cold cluster is not starved
//! - Passive reactivation is evaluated lazily against a deadline; no timer
//!   task has to outlive the destination it would reactivate. Readers see
//!   the lapse immediately, and `refresh_passive` commits it once

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Result of active probing.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActiveHealth {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for ActiveHealth {
    fn from(val: u8) -> Self {
        match val {
            1 => ActiveHealth::Healthy,
            2 => ActiveHealth::Unhealthy,
            _ => ActiveHealth::Unknown,
        }
    }
}

/// Result of passive observation.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PassiveHealth {
    Healthy = 0,
    Unhealthy = 1,
}

impl From<u8> for PassiveHealth {
    fn from(val: u8) -> Self {
        match val {
            1 => PassiveHealth::Unhealthy,
            _ => PassiveHealth::Healthy,
        }
    }
}

/// Monotonic nanoseconds since the first call in this process.
fn monotonic_nanos() -> u64 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let origin = *ORIGIN.get_or_init(Instant::now);
    u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Number of time buckets a passive detection window is split into.
const OUTCOME_BUCKETS: usize = 10;

#[derive(Debug, Default, Clone, Copy)]
struct OutcomeBucket {
    epoch: u64,
    total: u32,
    failures: u32,
}

/// Recent request outcomes for passive policies, counted in a fixed ring of
/// time buckets. Recording is O(buckets) and memory does not grow with
/// request rate; the window edge has bucket granularity.
#[derive(Debug, Default)]
pub(crate) struct OutcomeWindow {
    origin: Option<Instant>,
    bucket_width: Duration,
    buckets: [OutcomeBucket; OUTCOME_BUCKETS],
}

impl OutcomeWindow {
    /// Record an outcome and return `(total, failures)` over the buckets
    /// still inside `window`.
    pub(crate) fn record(&mut self, now: Instant, failed: bool, window: Duration) -> (usize, usize) {
        let width = (window / OUTCOME_BUCKETS as u32).max(Duration::from_nanos(1));
        if width != self.bucket_width {
            // window changed by a reload; old buckets mean something else
            self.clear();
            self.bucket_width = width;
        }
        let origin = *self.origin.get_or_insert(now);
        let elapsed = now.saturating_duration_since(origin).as_nanos() / width.as_nanos();
        let epoch = u64::try_from(elapsed).unwrap_or(u64::MAX);

        let bucket = &mut self.buckets[(epoch % OUTCOME_BUCKETS as u64) as usize];
        if bucket.epoch != epoch || bucket.total == 0 {
            *bucket = OutcomeBucket {
                epoch,
                total: 0,
                failures: 0,
            };
        }
        bucket.total = bucket.total.saturating_add(1);
        if failed {
            bucket.failures = bucket.failures.saturating_add(1);
        }

        let oldest = epoch.saturating_sub(OUTCOME_BUCKETS as u64 - 1);
        self.buckets
            .iter()
            .filter(|b| b.total > 0 && b.epoch >= oldest && b.epoch <= epoch)
            .fold((0, 0), |(total, failures), b| {
                (total + b.total as usize, failures + b.failures as usize)
            })
    }

    pub(crate) fn clear(&mut self) {
        self.origin = None;
        self.buckets = [OutcomeBucket::default(); OUTCOME_BUCKETS];
    }
}

/// Health of a single destination, shared by the probe loop, passive
/// reporting and `pick`.
#[derive(Debug)]
pub struct DestinationHealth {
    active: AtomicU8,
    passive: AtomicU8,
    /// Deadline (in `monotonic_nanos`) after which Passive=Unhealthy lapses.
    reactivate_at: AtomicU64,
    consecutive_failures: AtomicU32,
    outcomes: Mutex<OutcomeWindow>,
}

impl Default for DestinationHealth {
    fn default() -> Self {
        Self {
            active: AtomicU8::new(ActiveHealth::Unknown as u8),
            passive: AtomicU8::new(PassiveHealth::Healthy as u8),
            reactivate_at: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            outcomes: Mutex::new(OutcomeWindow::default()),
        }
    }
}

impl DestinationHealth {
    /// Current active state.
    pub fn active(&self) -> ActiveHealth {
        ActiveHealth::from(self.active.load(Ordering::Acquire))
    }

    /// Store a new active state. Returns true if the state changed.
    pub fn set_active(&self, state: ActiveHealth) -> bool {
        self.active.swap(state as u8, Ordering::AcqRel) != state as u8
    }

    /// Current passive state. An Unhealthy state whose reactivation
    /// deadline has passed reads as Healthy.
    pub fn passive(&self) -> PassiveHealth {
        if PassiveHealth::from(self.passive.load(Ordering::Acquire)) == PassiveHealth::Healthy {
            return PassiveHealth::Healthy;
        }
        if monotonic_nanos() < self.reactivate_at.load(Ordering::Acquire) {
            return PassiveHealth::Unhealthy;
        }
        PassiveHealth::Healthy
    }

    /// Flip an expired Passive=Unhealthy back to Healthy. Returns true for the
    /// one caller that performed the transition.
    pub(crate) fn refresh_passive(&self) -> bool {
        if PassiveHealth::from(self.passive.load(Ordering::Acquire)) == PassiveHealth::Healthy
            || monotonic_nanos() < self.reactivate_at.load(Ordering::Acquire)
        {
            return false;
        }
        self.passive
            .compare_exchange(
                PassiveHealth::Unhealthy as u8,
                PassiveHealth::Healthy as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Mark the destination passively unhealthy for `reactivation_period`.
    /// Returns true if it was healthy before.
    pub fn mark_passive_unhealthy(&self, reactivation_period: Duration) -> bool {
        let was_healthy = self.passive() == PassiveHealth::Healthy;
        let period = u64::try_from(reactivation_period.as_nanos()).unwrap_or(u64::MAX);
        self.reactivate_at
            .store(monotonic_nanos().saturating_add(period), Ordering::Release);
        self.passive.store(PassiveHealth::Unhealthy as u8, Ordering::Release);
        was_healthy
    }

    /// Available unless either signal says Unhealthy.
    pub fn is_available(&self) -> bool {
        self.active() != ActiveHealth::Unhealthy && self.passive() != PassiveHealth::Unhealthy
    }

    /// Increment the consecutive probe failure counter, returning the new value.
    pub(crate) fn record_probe_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Reset the consecutive probe failure counter.
    pub(crate) fn reset_probe_failures(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// Consecutive failed probes so far.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Run `f` with exclusive access to the passive outcome window.
    pub(crate) fn with_outcomes<R>(&self, f: impl FnOnce(&mut OutcomeWindow) -> R) -> R {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_available() {
        let health = DestinationHealth::default();
        assert_eq!(health.active(), ActiveHealth::Unknown);
        assert_eq!(health.passive(), PassiveHealth::Healthy);
        assert!(health.is_available());
    }

    #[test]
    fn test_active_unhealthy_is_unavailable() {
        let health = DestinationHealth::default();
        assert!(health.set_active(ActiveHealth::Unhealthy));
        assert!(!health.set_active(ActiveHealth::Unhealthy));
        assert!(!health.is_available());
        health.set_active(ActiveHealth::Healthy);
        assert!(health.is_available());
    }

    #[test]
    fn test_passive_reactivation() {
        let health = DestinationHealth::default();
        assert!(health.mark_passive_unhealthy(Duration::from_millis(30)));
        assert_eq!(health.passive(), PassiveHealth::Unhealthy);
        assert!(!health.is_available());

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(health.passive(), PassiveHealth::Healthy);
        assert!(health.is_available());
    }

    #[test]
    fn test_passive_refresh_commits_once() {
        let health = DestinationHealth::default();
        assert!(!health.refresh_passive());
        health.mark_passive_unhealthy(Duration::from_millis(10));
        assert!(!health.refresh_passive());

        std::thread::sleep(Duration::from_millis(30));
        assert!(health.refresh_passive());
        assert!(!health.refresh_passive());
        // healthy again, so a new ejection counts as a transition
        assert!(health.mark_passive_unhealthy(Duration::from_secs(60)));
    }

    #[test]
    fn test_outcome_window_prunes_old_samples() {
        let mut window = OutcomeWindow::default();
        let start = Instant::now();
        window.record(start, true, Duration::from_secs(10));
        window.record(start + Duration::from_secs(5), false, Duration::from_secs(10));
        let (total, failures) =
            window.record(start + Duration::from_secs(12), false, Duration::from_secs(10));
        assert_eq!((total, failures), (2, 0));
    }

    #[test]
    fn test_outcome_window_is_bounded_under_load() {
        let mut window = OutcomeWindow::default();
        let start = Instant::now();
        let span = Duration::from_secs(60);
        for i in 0..200_000u32 {
            window.record(start, i % 4 == 0, span);
        }
        assert_eq!(window.record(start, false, span), (200_001, 50_000));

        // a full window later every earlier bucket has expired
        let later = start + span + Duration::from_secs(6);
        assert_eq!(window.record(later, true, span), (1, 1));
    }

    #[test]
    fn test_outcome_window_resets_when_window_changes() {
        let mut window = OutcomeWindow::default();
        let start = Instant::now();
        window.record(start, true, Duration::from_secs(10));
        window.record(start, true, Duration::from_secs(10));
        assert_eq!(window.record(start, false, Duration::from_secs(30)), (1, 0));
    }
}
