//! Session affinity subsystem.
//!
//! # Data Flow
//! ```text
//! Request arrives for a cluster with affinity enabled
//!     → carrier.rs reads the raw key (cookie or custom header)
//!     → protector.rs decodes it (base64url, optionally AES-256-GCM)
//!     → key matched case-sensitively against available destination ids
//!     → AffinityResult { status, destinations }
//!
//! Response for the chosen destination
//!     → affinitize_response: no-op if the request already carried a valid
//!       key for that destination, otherwise carrier.rs writes a fresh key
//! ```
//!
//! # Design Decisions
//! - Nothing is stored server side; the key carries the binding
//! - A corrupt key is distinguishable from an absent one
//! - FailurePolicy decides between redistributing and failing with 503

pub mod carrier;
pub mod protector;

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::config::schema::SessionAffinityConfig;
use crate::http::ProxyRequest;
use crate::load_balancer::destination::DestinationState;
use crate::observability::metrics;

pub use carrier::AffinityCarrier;
pub use protector::{AffinityKeyError, KeyProtector};

/// What to do when a key is corrupt or names an unavailable destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Treat the request as unaffinitized and let the load balancer pick.
    Redistribute,
    /// Fail the request with 503.
    Return503,
}

impl FailurePolicy {
    fn resolve(name: Option<&str>) -> Result<Self, String> {
        match name.unwrap_or("Redistribute") {
            "Redistribute" => Ok(Self::Redistribute),
            "Return503" | "Return503Error" => Ok(Self::Return503),
            other => Err(format!("unknown affinity failure policy {:?}", other)),
        }
    }
}

/// A cluster's compiled affinity settings.
#[derive(Debug, Clone)]
pub struct AffinityPolicy {
    carrier: AffinityCarrier,
    failure_policy: FailurePolicy,
}

impl AffinityPolicy {
    /// Compile the cluster's affinity config. Returns `Ok(None)` when affinity
    /// is disabled.
    pub fn compile(config: &SessionAffinityConfig) -> Result<Option<Self>, Vec<String>> {
        if !config.enabled {
            return Ok(None);
        }
        let carrier = AffinityCarrier::resolve(
            config.policy.as_deref(),
            config.affinity_key_name.as_deref(),
            &config.cookie,
        );
        let failure_policy = FailurePolicy::resolve(config.failure_policy.as_deref());
        match (carrier, failure_policy) {
            (Ok(carrier), Ok(failure_policy)) => Ok(Some(Self {
                carrier,
                failure_policy,
            })),
            (carrier, failure_policy) => Err(carrier
                .err()
                .into_iter()
                .chain(failure_policy.err())
                .collect()),
        }
    }

    /// Key carrier.
    pub fn carrier(&self) -> &AffinityCarrier {
        &self.carrier
    }

    /// Failure policy.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }
}

/// Outcome of looking up an affinity binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffinityStatus {
    /// The key resolved to an available destination.
    Ok,
    /// The request carried no key.
    AffinityKeyNotSet,
    /// The key could not be decoded.
    AffinityKeyExtractionFailed,
    /// The key decoded, but names no available destination.
    DestinationNotFound,
}

impl AffinityStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::AffinityKeyNotSet => "key_not_set",
            Self::AffinityKeyExtractionFailed => "extraction_failed",
            Self::DestinationNotFound => "destination_not_found",
        }
    }
}

/// Per-request affinity binding.
#[derive(Debug, Clone)]
pub struct AffinityResult {
    pub status: AffinityStatus,
    /// The bound destination when `status` is `Ok`, otherwise empty.
    pub destinations: Vec<Arc<DestinationState>>,
}

impl AffinityResult {
    fn without_destinations(status: AffinityStatus) -> Self {
        Self {
            status,
            destinations: Vec::new(),
        }
    }

    /// True if the request was already bound to `destination`.
    pub fn is_bound_to(&self, destination: &DestinationState) -> bool {
        self.status == AffinityStatus::Ok
            && self.destinations.iter().any(|d| d.id() == destination.id())
    }
}

/// Process-wide affinity service: owns the key protector.
#[derive(Debug, Clone, Default)]
pub struct SessionAffinity {
    protector: KeyProtector,
}

impl SessionAffinity {
    pub fn new(protector: KeyProtector) -> Self {
        Self { protector }
    }

    /// Resolve the request's affinity key against `destinations`.
    pub fn find_affinitized_destinations(
        &self,
        request: &ProxyRequest,
        destinations: &[Arc<DestinationState>],
        cluster_id: &str,
        policy: &AffinityPolicy,
    ) -> AffinityResult {
        let result = self.resolve(request, destinations, cluster_id, policy);
        metrics::record_affinity(cluster_id, result.status.as_str());
        result
    }

    fn resolve(
        &self,
        request: &ProxyRequest,
        destinations: &[Arc<DestinationState>],
        cluster_id: &str,
        policy: &AffinityPolicy,
    ) -> AffinityResult {
        let Some(raw) = policy.carrier.read(&request.headers) else {
            return AffinityResult::without_destinations(AffinityStatus::AffinityKeyNotSet);
        };

        let destination_id = match self.protector.unprotect(&raw) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(cluster = %cluster_id, carrier = policy.carrier.name(), error = %e, "Affinity key extraction failed");
                return AffinityResult::without_destinations(AffinityStatus::AffinityKeyExtractionFailed);
            }
        };

        match destinations.iter().find(|d| d.id() == destination_id) {
            Some(destination) => AffinityResult {
                status: AffinityStatus::Ok,
                destinations: vec![destination.clone()],
            },
            None => {
                tracing::debug!(cluster = %cluster_id, destination = %destination_id, "Affinitized destination not available");
                AffinityResult::without_destinations(AffinityStatus::DestinationNotFound)
            }
        }
    }

    /// Emit the affinity key for `destination` unless the request already
    /// carried a valid one for it.
    pub fn affinitize_response(
        &self,
        response_headers: &mut HeaderMap,
        policy: &AffinityPolicy,
        previous: Option<&AffinityResult>,
        destination: &DestinationState,
    ) {
        if previous.is_some_and(|p| p.is_bound_to(destination)) {
            return;
        }
        let written = self
            .protector
            .protect(destination.id())
            .map_err(|e| e.to_string())
            .and_then(|key| policy.carrier.write(response_headers, &key));
        if let Err(e) = written {
            tracing::error!(destination = %destination.id(), error = %e, "Failed to write affinity key");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{CookieConfig, DestinationConfig};
    use axum::http::Method;

    fn destinations() -> Vec<Arc<DestinationState>> {
        ["A", "B", "C"]
            .iter()
            .map(|id| {
                Arc::new(DestinationState::new(*id, DestinationConfig::new("http://127.0.0.1:8080")).unwrap())
            })
            .collect()
    }

    fn header_policy() -> AffinityPolicy {
        AffinityPolicy::compile(&SessionAffinityConfig {
            enabled: true,
            policy: Some("CustomHeader".into()),
            failure_policy: None,
            affinity_key_name: Some("X-MyAffinity".into()),
            cookie: CookieConfig::default(),
        })
        .unwrap()
        .unwrap()
    }

    #[test]
    fn test_key_resolves_to_destination() {
        let affinity = SessionAffinity::default();
        let policy = header_policy();
        let dests = destinations();
        let key = KeyProtector::Encoded.protect("B").unwrap();

        let mut request = ProxyRequest::new(Method::GET, "/");
        request.headers.insert("x-myaffinity", key.parse().unwrap());
        let result = affinity.find_affinitized_destinations(&request, &dests, "cluster1", &policy);
        assert_eq!(result.status, AffinityStatus::Ok);
        assert_eq!(result.destinations.len(), 1);
        assert_eq!(result.destinations[0].id(), "B");
    }

    #[test]
    fn test_missing_key() {
        let affinity = SessionAffinity::default();
        let request = ProxyRequest::new(Method::GET, "/");
        let result =
            affinity.find_affinitized_destinations(&request, &destinations(), "cluster1", &header_policy());
        assert_eq!(result.status, AffinityStatus::AffinityKeyNotSet);
        assert!(result.destinations.is_empty());
    }

    #[test]
    fn test_corrupt_and_unknown_keys() {
        let affinity = SessionAffinity::default();
        let policy = header_policy();

        let mut request = ProxyRequest::new(Method::GET, "/");
        request.headers.insert("x-myaffinity", "!!!".parse().unwrap());
        let result = affinity.find_affinitized_destinations(&request, &destinations(), "c", &policy);
        assert_eq!(result.status, AffinityStatus::AffinityKeyExtractionFailed);

        // ids are case-sensitive
        let key = KeyProtector::Encoded.protect("b").unwrap();
        request.headers.insert("x-myaffinity", key.parse().unwrap());
        let result = affinity.find_affinitized_destinations(&request, &destinations(), "c", &policy);
        assert_eq!(result.status, AffinityStatus::DestinationNotFound);
        assert!(result.destinations.is_empty());
    }

    #[test]
    fn test_affinitize_is_idempotent() {
        let affinity = SessionAffinity::default();
        let policy = header_policy();
        let dests = destinations();

        let mut first = HeaderMap::new();
        let unbound = AffinityResult::without_destinations(AffinityStatus::AffinityKeyNotSet);
        affinity.affinitize_response(&mut first, &policy, Some(&unbound), &dests[1]);
        let key = first["x-myaffinity"].to_str().unwrap().to_string();
        assert_eq!(KeyProtector::Encoded.unprotect(&key).unwrap(), "B");

        let mut request = ProxyRequest::new(Method::GET, "/");
        request.headers.insert("x-myaffinity", key.parse().unwrap());
        let bound = affinity.find_affinitized_destinations(&request, &dests, "c", &policy);

        let mut second = HeaderMap::new();
        affinity.affinitize_response(&mut second, &policy, Some(&bound), &dests[1]);
        assert!(second.is_empty());

        // bound elsewhere: rewrite
        affinity.affinitize_response(&mut second, &policy, Some(&bound), &dests[2]);
        assert_eq!(
            KeyProtector::Encoded
                .unprotect(second["x-myaffinity"].to_str().unwrap())
                .unwrap(),
            "C"
        );
    }

    #[test]
    fn test_compile_policy() {
        let mut config = SessionAffinityConfig {
            enabled: false,
            policy: Some("Nope".into()),
            failure_policy: Some("Nope".into()),
            affinity_key_name: None,
            cookie: CookieConfig::default(),
        };
        assert!(AffinityPolicy::compile(&config).unwrap().is_none());

        config.enabled = true;
        assert_eq!(AffinityPolicy::compile(&config).unwrap_err().len(), 2);

        config.policy = None;
        config.failure_policy = Some("Return503".into());
        let policy = AffinityPolicy::compile(&config).unwrap().unwrap();
        assert_eq!(policy.failure_policy(), FailurePolicy::Return503);
        assert_eq!(policy.carrier().name(), "Cookie");
    }
}
