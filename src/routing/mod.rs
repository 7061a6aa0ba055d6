//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, host, path, headers)
//!     → router.rs (ordered scan, skip routes with unknown clusters)
//!     → matcher.rs (evaluate match conditions)
//!     → pattern.rs (path match, capture route values)
//!     → Return: matched Route + RouteValues, or no match
//!
//! Route Compilation (per snapshot):
//!     RouteConfig[]
//!     → Compile matchers and transforms
//!     → Sort by (order, specificity, id)
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled per snapshot, immutable at runtime
//! - No regex in hot path
//! - Deterministic: same input always matches same route
//! - First match wins

pub mod matcher;
pub mod pattern;
pub mod router;

pub use pattern::RouteValues;
pub use router::{Route, RouteTable};
