//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active (active.rs):
//!     Probe loop per cluster (interval from snapshot)
//!     → GET health address, bounded by timeout
//!     → policy.rs: ConsecutiveFailures verdict
//!     → state.rs: Active = Healthy | Unhealthy
//!
//! Passive (passive.rs):
//!     Forwarding outcome reported by the caller
//!     → policy.rs: TransportFailureRate over a sliding window
//!     → state.rs: Passive = Unhealthy until the reactivation deadline
//!
//! Consumers:
//!     → ClusterState::available_destinations (load balancer, affinity)
//! ```
//!
//! # Design Decisions
//! - Health lives on the destination's runtime record, which survives
//!   snapshot swaps while the destination's identity is unchanged
//! - Probe failures are contained here; they never reach a request path
//! - Unknown active state counts as available

pub mod active;
pub mod passive;
pub mod policy;
pub mod state;

pub use active::{ActiveHealthMonitor, HealthProbe, HttpProbe, ProbeError};
pub use passive::{ForwardOutcome, PassiveHealthMonitor};
pub use state::{ActiveHealth, DestinationHealth, PassiveHealth};
