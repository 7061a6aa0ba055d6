//! Response view used by response and trailer transforms.
//!
//! # Responsibilities
//! - Carry the destination's status, headers and trailers back through the
//!   pipeline so response transforms and `When` conditions can evaluate
//!
//! # Design Decisions
//! - Bodies stream through the forwarding collaborator untouched

use axum::http::{HeaderMap, StatusCode};

/// Destination response metadata, mutated in place by response transforms.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub trailers: HeaderMap,
}

impl ProxyResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
        }
    }
}

impl From<&axum::http::response::Parts> for ProxyResponse {
    fn from(parts: &axum::http::response::Parts) -> Self {
        Self {
            status: parts.status,
            headers: parts.headers.clone(),
            trailers: HeaderMap::new(),
        }
    }
}
