//! Destination abstraction.
//!
//! # Responsibilities
//! - Represent a single backend endpoint inside a snapshot
//! - Track in-flight requests (for LeastRequests / PowerOfTwoChoices)
//! - Own the destination's health state
//! - Share runtime state with the next snapshot when identity is unchanged

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::Uri;
use url::Url;

use crate::config::schema::DestinationConfig;
use crate::health::state::DestinationHealth;

/// State that outlives a snapshot when the destination's identity is kept.
#[derive(Debug, Default)]
pub struct DestinationRuntime {
    health: DestinationHealth,
    concurrent_requests: AtomicUsize,
}

/// A single destination within a cluster snapshot.
#[derive(Debug)]
pub struct DestinationState {
    id: String,
    config: DestinationConfig,
    address: Url,
    health_address: Option<Url>,
    runtime: Arc<DestinationRuntime>,
}

impl DestinationState {
    /// Create a destination with fresh runtime state.
    pub fn new(id: impl Into<String>, config: DestinationConfig) -> Result<Self, String> {
        Self::with_runtime(id.into(), config, Arc::default())
    }

    /// Create a destination that shares runtime state with `previous`.
    pub fn carry_forward(
        id: impl Into<String>,
        config: DestinationConfig,
        previous: &DestinationState,
    ) -> Result<Self, String> {
        Self::with_runtime(id.into(), config, previous.runtime.clone())
    }

    fn with_runtime(
        id: String,
        config: DestinationConfig,
        runtime: Arc<DestinationRuntime>,
    ) -> Result<Self, String> {
        let address = parse_address(&config.address)?;
        let health_address = config.health.as_deref().map(parse_address).transpose()?;
        Ok(Self {
            id,
            config,
            address,
            health_address,
            runtime,
        })
    }

    /// Destination id, unique within its cluster.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Configuration the destination was built from.
    pub fn config(&self) -> &DestinationConfig {
        &self.config
    }

    /// Address requests are forwarded to.
    pub fn address(&self) -> &Url {
        &self.address
    }

    /// Health state.
    pub fn health(&self) -> &DestinationHealth {
        &self.runtime.health
    }

    /// True if both runtimes are the same allocation.
    pub fn shares_runtime_with(&self, other: &DestinationState) -> bool {
        Arc::ptr_eq(&self.runtime, &other.runtime)
    }

    /// Available for new requests.
    pub fn is_available(&self) -> bool {
        self.runtime.health.is_available()
    }

    /// Get the current number of in-flight requests.
    pub fn concurrent_requests(&self) -> usize {
        self.runtime.concurrent_requests.load(Ordering::Relaxed)
    }

    /// Count a request as in flight until the returned guard is dropped.
    pub fn begin_request(self: &Arc<Self>) -> RequestGuard {
        self.runtime.concurrent_requests.fetch_add(1, Ordering::Relaxed);
        RequestGuard {
            destination: self.clone(),
        }
    }

    /// URI for an active probe: health address (or address) + path + query.
    pub fn probe_uri(&self, path: Option<&str>, query: Option<&str>) -> Result<Uri, String> {
        let base = self.health_address.as_ref().unwrap_or(&self.address);
        let mut uri = base.as_str().trim_end_matches('/').to_string();
        match path {
            Some(path) if !path.is_empty() => {
                if !path.starts_with('/') {
                    uri.push('/');
                }
                uri.push_str(path);
            }
            _ => uri.push('/'),
        }
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            uri.push('?');
            uri.push_str(query.trim_start_matches('?'));
        }
        uri.parse::<Uri>()
            .map_err(|e| format!("invalid probe uri {:?}: {}", uri, e))
    }
}

fn parse_address(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid address {:?}: {}", raw, e))?;
    if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
        return Err(format!("address {:?} must be an absolute http(s) URI", raw));
    }
    Ok(url)
}

/// A RAII guard that manages the in-flight request count.
#[derive(Debug)]
pub struct RequestGuard {
    destination: Arc<DestinationState>,
}

impl RequestGuard {
    /// The destination this guard counts against.
    pub fn destination(&self) -> &Arc<DestinationState> {
        &self.destination
    }
}

impl Deref for RequestGuard {
    type Target = DestinationState;
    fn deref(&self) -> &Self::Target {
        &self.destination
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.destination
            .runtime
            .concurrent_requests
            .fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::state::ActiveHealth;

    fn destination(address: &str) -> Arc<DestinationState> {
        Arc::new(DestinationState::new("d1", DestinationConfig::new(address)).unwrap())
    }

    #[test]
    fn test_guard_counts_in_flight() {
        let d = destination("http://127.0.0.1:8080");
        let g1 = d.begin_request();
        let g2 = d.begin_request();
        assert_eq!(d.concurrent_requests(), 2);
        drop(g1);
        assert_eq!(g2.concurrent_requests(), 1);
        drop(g2);
        assert_eq!(d.concurrent_requests(), 0);
    }

    #[test]
    fn test_carry_forward_shares_runtime() {
        let old = destination("http://127.0.0.1:8080");
        old.health().set_active(ActiveHealth::Unhealthy);
        let _guard = old.begin_request();

        let mut config = DestinationConfig::new("http://127.0.0.1:8080");
        config.metadata.insert("zone".into(), "b".into());
        let new = DestinationState::carry_forward("d1", config, &old).unwrap();
        assert!(new.shares_runtime_with(&old));
        assert_eq!(new.health().active(), ActiveHealth::Unhealthy);
        assert_eq!(new.concurrent_requests(), 1);
    }

    #[test]
    fn test_probe_uri() {
        let d = destination("http://10.0.0.1:8080/base/");
        assert_eq!(
            d.probe_uri(Some("/health"), Some("ready=1")).unwrap().to_string(),
            "http://10.0.0.1:8080/base/health?ready=1"
        );
        assert_eq!(d.probe_uri(None, None).unwrap().to_string(), "http://10.0.0.1:8080/base/");

        let mut config = DestinationConfig::new("http://10.0.0.1:8080");
        config.health = Some("http://10.0.0.1:9000".into());
        let d = DestinationState::new("d2", config).unwrap();
        assert_eq!(
            d.probe_uri(Some("status"), None).unwrap().to_string(),
            "http://10.0.0.1:9000/status"
        );
    }

    #[test]
    fn test_rejects_bad_address() {
        assert!(DestinationState::new("d", DestinationConfig::new("not a uri")).is_err());
        assert!(DestinationState::new("d", DestinationConfig::new("ftp://host")).is_err());
    }
}
