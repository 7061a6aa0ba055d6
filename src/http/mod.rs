//! HTTP-facing types and the per-request pipeline.
//!
//! # Data Flow
//! ```text
//! Listener (external) builds a ProxyRequest
//!     → pipeline.rs route(): match → request transforms → affinity → pick
//!     → ForwardPlan { destination, OutgoingRequest, in-flight guard }
//!     → forwarding collaborator performs the call
//!     → pipeline.rs complete(): passive health → affinity binding
//!                               → response/trailer transforms
//!     → ProxyResponse back to the listener
//! ```

pub mod pipeline;
pub mod request;
pub mod response;

pub use crate::health::passive::ForwardOutcome;
pub use pipeline::{ForwardPlan, ProxyError, ProxyPipeline};
pub use request::{OutgoingRequest, ProxyRequest};
pub use response::ProxyResponse;
