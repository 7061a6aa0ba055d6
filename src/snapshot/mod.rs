//! Configuration snapshots.
//!
//! # Data Flow
//! ```text
//! ProxyConfig
//!     → builder.rs (validate, resolve policies, compile routes,
//!                   carry destination runtime state forward)
//!     → ProxySnapshot (immutable, versioned)
//!     → store.rs (atomic swap, notify subscribers)
//!
//! Readers (per request, health monitors, admin API):
//!     SnapshotStore::current() → Arc<ProxySnapshot>
//! ```
//!
//! # Design Decisions
//! - A request works against one snapshot from match to completion
//! - Publishing never blocks readers
//! - A rejected config leaves the previous snapshot in effect

pub mod builder;
pub mod model;
pub mod store;

pub use builder::SnapshotBuilder;
pub use model::{ActiveHealthSettings, ClusterState, PassiveHealthSettings, ProxySnapshot, RouteMatchResult};
pub use store::SnapshotStore;
