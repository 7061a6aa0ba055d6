//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.
//! Policy names stay as plain strings here; they are resolved against the
//! registered policy set when a snapshot is built.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Route definitions mapping requests to clusters.
    pub routes: Vec<RouteConfig>,

    /// Cluster definitions, each owning its destinations.
    pub clusters: Vec<ClusterConfig>,

    /// Process-wide session affinity settings (key protection).
    pub session_affinity: SessionAffinityOptions,

    /// Process-wide health check tunables.
    pub health_check: HealthCheckOptions,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// A single transform descriptor: one transform unit keyed by transform name.
///
/// Example: `{ RequestHeader = "X-Tenant", Set = "blue" }`.
pub type TransformDescriptor = BTreeMap<String, String>;

/// Route configuration mapping requests to a cluster.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Unique route identifier.
    pub id: String,

    /// Cluster the route forwards to. May name a cluster that does not exist
    /// yet; such a route never matches.
    pub cluster_id: String,

    /// Route order (lower = checked first).
    #[serde(default)]
    pub order: i32,

    /// Match criteria.
    #[serde(rename = "match", default)]
    pub match_criteria: RouteMatch,

    /// Ordered transform descriptors.
    #[serde(default)]
    pub transforms: Vec<TransformDescriptor>,

    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RouteConfig {
    /// Create a route that matches `path` and forwards to `cluster_id`.
    pub fn new(id: impl Into<String>, cluster_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cluster_id: cluster_id.into(),
            order: 0,
            match_criteria: RouteMatch {
                path: Some(path.into()),
                ..RouteMatch::default()
            },
            transforms: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// Request match criteria. Every present criterion must match.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RouteMatch {
    /// Allowed HTTP methods (case-insensitive). `None` = any method.
    pub methods: Option<Vec<String>>,

    /// Host patterns: `example.com`, `*.example.com`, optionally with `:port`.
    pub hosts: Option<Vec<String>>,

    /// Path pattern: literal segments, `{param}` captures and a trailing
    /// `{*catchAll}` capture.
    pub path: Option<String>,

    /// Header conditions.
    pub headers: Vec<HeaderMatchConfig>,
}

/// A single header match condition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HeaderMatchConfig {
    /// Header name.
    pub name: String,

    /// Candidate values; any one matching is enough. Ignored for `Exists`.
    #[serde(default)]
    pub values: Vec<String>,

    /// Comparison mode.
    #[serde(default)]
    pub mode: HeaderMatchMode,

    /// Compare values case-sensitively.
    #[serde(default)]
    pub is_case_sensitive: bool,
}

/// How header values are compared.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
pub enum HeaderMatchMode {
    /// The header value equals one of the configured values.
    #[default]
    Exact,
    /// The header value starts with one of the configured values.
    Prefix,
    /// The header value contains one of the configured values.
    Contains,
    /// The header is present, whatever its value.
    Exists,
}

/// Cluster configuration: a named group of destinations sharing policies.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ClusterConfig {
    /// Unique cluster identifier.
    pub id: String,

    /// Load balancing policy name (default: `PowerOfTwoChoices`).
    #[serde(default)]
    pub load_balancing_policy: Option<String>,

    /// Health check settings.
    #[serde(default)]
    pub health_check: ClusterHealthCheckConfig,

    /// Session affinity settings.
    #[serde(default)]
    pub session_affinity: Option<SessionAffinityConfig>,

    /// Policy parameters, addressed as `PolicyName.ParameterName`.
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Destinations keyed by id.
    #[serde(default)]
    pub destinations: BTreeMap<String, DestinationConfig>,
}

impl ClusterConfig {
    /// Create a cluster with default policies and no destinations.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            load_balancing_policy: None,
            health_check: ClusterHealthCheckConfig::default(),
            session_affinity: None,
            metadata: HashMap::new(),
            destinations: BTreeMap::new(),
        }
    }

    /// Builder-style helper to add a destination.
    pub fn with_destination(mut self, id: impl Into<String>, address: impl Into<String>) -> Self {
        self.destinations.insert(id.into(), DestinationConfig::new(address));
        self
    }
}

/// Backend endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DestinationConfig {
    /// Destination address (e.g., "http://127.0.0.1:3000").
    pub address: String,

    /// Separate address for active health probes.
    #[serde(default)]
    pub health: Option<String>,

    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DestinationConfig {
    /// Create a destination config for `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            health: None,
            metadata: HashMap::new(),
        }
    }
}

/// Per-cluster health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ClusterHealthCheckConfig {
    /// Active probing.
    pub active: ActiveHealthCheckConfig,

    /// Passive failure observation.
    pub passive: PassiveHealthCheckConfig,
}

/// Active health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ActiveHealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe interval in milliseconds.
    pub interval_ms: u64,

    /// Per-probe deadline in milliseconds.
    pub timeout_ms: u64,

    /// Policy name (default: `ConsecutiveFailures`).
    pub policy: Option<String>,

    /// Path appended to the probe address.
    pub path: Option<String>,

    /// Query string appended to the probe address (without `?`).
    pub query: Option<String>,
}

impl Default for ActiveHealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 15_000,
            timeout_ms: 10_000,
            policy: None,
            path: None,
            query: None,
        }
    }
}

/// Passive health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PassiveHealthCheckConfig {
    /// Enable passive health checks.
    pub enabled: bool,

    /// Policy name (default: `TransportFailureRate`).
    pub policy: Option<String>,

    /// How long a destination stays passively unhealthy, in milliseconds.
    pub reactivation_period_ms: u64,
}

impl Default for PassiveHealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: None,
            reactivation_period_ms: 60_000,
        }
    }
}

/// Per-cluster session affinity configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SessionAffinityConfig {
    /// Enable session affinity.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Key carrier: `Cookie` (default) or `CustomHeader`.
    #[serde(default)]
    pub policy: Option<String>,

    /// What to do with a corrupt key or an unavailable bound destination:
    /// `Redistribute` (default) or `Return503`.
    #[serde(default)]
    pub failure_policy: Option<String>,

    /// Cookie or header name carrying the key.
    #[serde(default)]
    pub affinity_key_name: Option<String>,

    /// Cookie attributes (cookie carrier only).
    #[serde(default)]
    pub cookie: CookieConfig,
}

fn default_true() -> bool {
    true
}

/// Attributes of the affinity cookie.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CookieConfig {
    /// Cookie `Path` attribute.
    pub path: Option<String>,

    /// Cookie `Domain` attribute.
    pub domain: Option<String>,

    /// Emit `HttpOnly`.
    pub http_only: bool,

    /// Emit `Secure`.
    pub secure: bool,

    /// `SameSite` attribute: `Lax`, `Strict` or `None`.
    pub same_site: Option<String>,

    /// Cookie `Max-Age` in seconds. Session cookie when absent.
    pub max_age_secs: Option<u64>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            path: Some("/".to_string()),
            domain: None,
            http_only: true,
            secure: false,
            same_site: None,
            max_age_secs: None,
        }
    }
}

/// Process-wide session affinity options.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct SessionAffinityOptions {
    /// Base64-encoded 32-byte AES-256-GCM key. When absent, affinity keys are
    /// only base64url-encoded.
    pub protection_key: Option<String>,
}

/// Process-wide health check tunables.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckOptions {
    /// User agent sent with active probes.
    pub probe_user_agent: String,

    /// Sliding window for the passive failure-rate policy, in milliseconds.
    pub passive_detection_window_ms: u64,

    /// Minimum number of outcomes in the window before the failure rate is
    /// evaluated.
    pub passive_minimal_total_count: u32,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            probe_user_agent: "proxy-core-health-check".to_string(),
            passive_detection_window_ms: 60_000,
            passive_minimal_total_count: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
