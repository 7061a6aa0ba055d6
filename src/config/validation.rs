//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check patterns, policy names and transform descriptors
//! - Validate value ranges (intervals > 0, addresses parse)
//! - Detect duplicate route and cluster ids
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Validation compiles the snapshot and throws it away, so whatever the
//!   snapshot builder accepts is exactly what validation accepts

use std::fmt;

use crate::affinity::KeyProtector;
use crate::config::schema::ProxyConfig;
use crate::snapshot::builder::SnapshotBuilder;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// What the problem belongs to, e.g. `route 'r1'`.
    pub scope: String,
    /// Human readable description.
    pub message: String,
}

impl ValidationError {
    /// A problem with a route.
    pub fn route(id: &str, message: impl Into<String>) -> Self {
        Self {
            scope: format!("route '{}'", id),
            message: message.into(),
        }
    }

    /// A problem with a cluster.
    pub fn cluster(id: &str, message: impl Into<String>) -> Self {
        Self {
            scope: format!("cluster '{}'", id),
            message: message.into(),
        }
    }

    /// A problem with a destination.
    pub fn destination(cluster_id: &str, id: &str, message: impl Into<String>) -> Self {
        Self {
            scope: format!("cluster '{}' destination '{}'", cluster_id, id),
            message: message.into(),
        }
    }

    /// A problem with a process-wide section.
    pub fn section(name: &str, message: impl Into<String>) -> Self {
        Self {
            scope: format!("[{}]", name),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.scope, self.message)
    }
}

/// Validate a configuration without publishing it.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = KeyProtector::from_options(&config.session_affinity) {
        errors.push(ValidationError::section("session_affinity", e.to_string()));
    }

    if let Err(mut snapshot_errors) = SnapshotBuilder::new(config, None).build(0) {
        errors.append(&mut snapshot_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ClusterConfig, RouteConfig};

    #[test]
    fn test_valid_config_passes() {
        let mut config = ProxyConfig::default();
        config.routes.push(RouteConfig::new("r1", "c1", "/{**catchall}"));
        config
            .clusters
            .push(ClusterConfig::new("c1").with_destination("d1", "http://127.0.0.1:3000"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = ProxyConfig::default();
        config.routes.push(RouteConfig::new("r1", "c1", "/{*a}/{b}"));
        let mut cluster = ClusterConfig::new("c1").with_destination("d1", "not a uri");
        cluster.load_balancing_policy = Some("Fastest".into());
        config.clusters.push(cluster);
        config.session_affinity.protection_key = Some("short".into());

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4, "{:?}", errors);
        assert!(errors.iter().any(|e| e.scope == "route 'r1'"));
        assert!(errors.iter().any(|e| e.message.contains("Fastest")));
        assert!(errors.iter().any(|e| e.scope == "cluster 'c1' destination 'd1'"));
        assert!(errors.iter().any(|e| e.scope == "[session_affinity]"));
    }
}
