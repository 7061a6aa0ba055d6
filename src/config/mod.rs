//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → SnapshotStore::publish (compiled into a ProxySnapshot)
//!
//! On reload:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → SnapshotStore::publish swaps the active snapshot
//!     → rejected reloads keep the previous snapshot
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::ConfigError;
pub use schema::{
    ActiveHealthCheckConfig, AdminConfig, ClusterConfig, ClusterHealthCheckConfig, CookieConfig,
    DestinationConfig, HeaderMatchConfig, HeaderMatchMode, HealthCheckOptions,
    ObservabilityConfig, PassiveHealthCheckConfig, ProxyConfig, RouteConfig, RouteMatch,
    SessionAffinityConfig, SessionAffinityOptions, TransformDescriptor,
};
pub use validation::ValidationError;
