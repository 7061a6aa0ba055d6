//! Reverse proxy decision core.
//!
//! Given a request and a reloadable topology of routes, clusters and
//! destinations, decides which route applies, how the request is rewritten,
//! and which healthy destination receives it, optionally pinning clients to
//! a destination through session affinity.

pub mod admin;
pub mod affinity;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod routing;
pub mod snapshot;
pub mod transforms;

pub use config::schema::ProxyConfig;
pub use http::{ForwardOutcome, ForwardPlan, ProxyError, ProxyPipeline, ProxyRequest, ProxyResponse};
pub use lifecycle::Shutdown;
pub use snapshot::SnapshotStore;
