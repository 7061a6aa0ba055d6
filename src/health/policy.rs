//! Health policies, resolved by name once per snapshot.
//!
//! Policies read their parameters from cluster metadata using the
//! `PolicyName.ParameterName` convention. A missing parameter means the
//! documented default; a present but unparsable one is a config error.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::schema::HealthCheckOptions;
use crate::health::state::{ActiveHealth, DestinationHealth};

/// Name of the default active policy.
pub const CONSECUTIVE_FAILURES: &str = "ConsecutiveFailures";
/// Metadata key for the consecutive failure threshold.
pub const CONSECUTIVE_FAILURES_THRESHOLD: &str = "ConsecutiveFailuresHealthPolicy.Threshold";
/// Default consecutive failure threshold.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Name of the default passive policy.
pub const TRANSPORT_FAILURE_RATE: &str = "TransportFailureRate";
/// Metadata key for the failure rate limit.
pub const TRANSPORT_FAILURE_RATE_LIMIT: &str = "TransportFailureRateHealthPolicy.RateLimit";
/// Default failure rate limit.
pub const DEFAULT_FAILURE_RATE_LIMIT: f64 = 0.3;

/// Decides active health from probe results.
#[derive(Debug, Clone, PartialEq)]
pub enum ActiveHealthPolicy {
    /// Unhealthy after `threshold` failed probes in a row; one pass restores.
    ConsecutiveFailures { threshold: u32 },
}

impl ActiveHealthPolicy {
    /// Resolve a policy by name (default `ConsecutiveFailures`).
    pub fn resolve(name: Option<&str>, metadata: &HashMap<String, String>) -> Result<Self, String> {
        match name.unwrap_or(CONSECUTIVE_FAILURES) {
            CONSECUTIVE_FAILURES => {
                let threshold = parse_metadata(metadata, CONSECUTIVE_FAILURES_THRESHOLD)?
                    .unwrap_or(DEFAULT_FAILURE_THRESHOLD);
                if threshold == 0 {
                    return Err(format!("{} must be at least 1", CONSECUTIVE_FAILURES_THRESHOLD));
                }
                Ok(Self::ConsecutiveFailures { threshold })
            }
            other => Err(format!("unknown active health check policy {:?}", other)),
        }
    }

    /// Policy name as configured.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConsecutiveFailures { .. } => CONSECUTIVE_FAILURES,
        }
    }

    /// Fold one probe result into the destination's counters and return the
    /// active state it should now have.
    pub fn evaluate(&self, health: &DestinationHealth, passed: bool) -> ActiveHealth {
        match self {
            Self::ConsecutiveFailures { threshold } => {
                if passed {
                    health.reset_probe_failures();
                    return ActiveHealth::Healthy;
                }
                if health.record_probe_failure() >= *threshold {
                    ActiveHealth::Unhealthy
                } else {
                    health.active()
                }
            }
        }
    }
}

/// Decides passive health from forwarded request outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum PassiveHealthPolicy {
    /// Unhealthy when the failure rate over `window` exceeds `rate_limit`,
    /// once at least `minimal_total_count` outcomes were seen.
    TransportFailureRate {
        rate_limit: f64,
        window: Duration,
        minimal_total_count: usize,
    },
}

impl PassiveHealthPolicy {
    /// Resolve a policy by name (default `TransportFailureRate`).
    pub fn resolve(
        name: Option<&str>,
        metadata: &HashMap<String, String>,
        options: &HealthCheckOptions,
    ) -> Result<Self, String> {
        match name.unwrap_or(TRANSPORT_FAILURE_RATE) {
            TRANSPORT_FAILURE_RATE => {
                let rate_limit = parse_metadata(metadata, TRANSPORT_FAILURE_RATE_LIMIT)?
                    .unwrap_or(DEFAULT_FAILURE_RATE_LIMIT);
                if !(rate_limit > 0.0 && rate_limit <= 1.0) {
                    return Err(format!("{} must be in (0, 1]", TRANSPORT_FAILURE_RATE_LIMIT));
                }
                Ok(Self::TransportFailureRate {
                    rate_limit,
                    window: Duration::from_millis(options.passive_detection_window_ms),
                    minimal_total_count: options.passive_minimal_total_count as usize,
                })
            }
            other => Err(format!("unknown passive health check policy {:?}", other)),
        }
    }

    /// Policy name as configured.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TransportFailureRate { .. } => TRANSPORT_FAILURE_RATE,
        }
    }

    /// Record one outcome. Returns true if the destination should be marked
    /// passively unhealthy.
    pub fn evaluate(&self, health: &DestinationHealth, failed: bool, now: Instant) -> bool {
        match self {
            Self::TransportFailureRate {
                rate_limit,
                window,
                minimal_total_count,
            } => health.with_outcomes(|outcomes| {
                let (total, failures) = outcomes.record(now, failed, *window);
                if total == 0 || total < *minimal_total_count {
                    return false;
                }
                let rate = failures as f64 / total as f64;
                if rate > *rate_limit {
                    // Start the next evaluation from a clean slate.
                    outcomes.clear();
                    true
                } else {
                    false
                }
            }),
        }
    }
}

fn parse_metadata<T: std::str::FromStr>(
    metadata: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, String> {
    metadata
        .get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| format!("metadata {} has unparsable value {:?}", key, raw))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_consecutive_failures_default_threshold() {
        let policy = ActiveHealthPolicy::resolve(None, &HashMap::new()).unwrap();
        assert_eq!(policy, ActiveHealthPolicy::ConsecutiveFailures { threshold: 3 });

        let health = DestinationHealth::default();
        assert_eq!(policy.evaluate(&health, false), ActiveHealth::Unknown);
        assert_eq!(policy.evaluate(&health, false), ActiveHealth::Unknown);
        assert_eq!(policy.evaluate(&health, false), ActiveHealth::Unhealthy);
        assert_eq!(policy.evaluate(&health, true), ActiveHealth::Healthy);
        assert_eq!(health.consecutive_failures(), 0);
    }

    #[test]
    fn test_threshold_from_metadata() {
        let policy = ActiveHealthPolicy::resolve(
            Some("ConsecutiveFailures"),
            &metadata(&[(CONSECUTIVE_FAILURES_THRESHOLD, "1")]),
        )
        .unwrap();
        let health = DestinationHealth::default();
        assert_eq!(policy.evaluate(&health, false), ActiveHealth::Unhealthy);

        assert!(ActiveHealthPolicy::resolve(None, &metadata(&[(CONSECUTIVE_FAILURES_THRESHOLD, "x")])).is_err());
        assert!(ActiveHealthPolicy::resolve(None, &metadata(&[(CONSECUTIVE_FAILURES_THRESHOLD, "0")])).is_err());
        assert!(ActiveHealthPolicy::resolve(Some("Ping"), &HashMap::new()).is_err());
    }

    #[test]
    fn test_failure_rate_needs_minimal_count() {
        let options = HealthCheckOptions {
            passive_minimal_total_count: 4,
            ..HealthCheckOptions::default()
        };
        let policy = PassiveHealthPolicy::resolve(None, &HashMap::new(), &options).unwrap();
        let health = DestinationHealth::default();
        let now = Instant::now();

        assert!(!policy.evaluate(&health, true, now));
        assert!(!policy.evaluate(&health, true, now));
        assert!(!policy.evaluate(&health, false, now));
        // 3 failures out of 4 = 0.75 > 0.3
        assert!(policy.evaluate(&health, true, now));
        // window was cleared after the verdict
        assert!(!policy.evaluate(&health, true, now));
    }

    #[test]
    fn test_failure_rate_under_limit() {
        let options = HealthCheckOptions {
            passive_minimal_total_count: 2,
            ..HealthCheckOptions::default()
        };
        let policy = PassiveHealthPolicy::resolve(
            Some("TransportFailureRate"),
            &metadata(&[(TRANSPORT_FAILURE_RATE_LIMIT, "0.5")]),
            &options,
        )
        .unwrap();
        let health = DestinationHealth::default();
        let now = Instant::now();
        assert!(!policy.evaluate(&health, false, now));
        assert!(!policy.evaluate(&health, true, now)); // 0.5 is not above 0.5
        assert!(policy.evaluate(&health, true, now));

        assert!(PassiveHealthPolicy::resolve(
            None,
            &metadata(&[(TRANSPORT_FAILURE_RATE_LIMIT, "1.5")]),
            &options
        )
        .is_err());
    }
}
