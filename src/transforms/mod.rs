//! Transform pipeline subsystem.
//!
//! # Data Flow
//! ```text
//! Route config (Vec<TransformDescriptor>)
//!     → builder.rs (compile each descriptor once, at snapshot build)
//!     → TransformPipeline { flags, request[], response[], trailers[] }
//!
//! Per request:
//!     ProxyRequest + route values
//!     → copy inbound headers (unless RequestHeadersCopy=false)
//!     → request.rs / forwarded.rs transforms, in declaration order
//!     → OutgoingRequest
//!
//! Per response:
//!     ProxyResponse → response.rs transforms gated by When
//! ```
//!
//! # Design Decisions
//! - Descriptors never reach the hot path; only compiled enums do
//! - Unknown keys fail the whole snapshot build
//! - Host is not copied to the destination unless RequestHeaderOriginalHost

pub mod builder;
pub mod forwarded;
pub mod request;
pub mod response;

use axum::http::header::{self, HeaderName};
use axum::http::HeaderMap;

use crate::config::schema::TransformDescriptor;
use crate::http::{OutgoingRequest, ProxyRequest, ProxyResponse};
use crate::routing::pattern::RouteValues;

use self::builder::{build_transform, BuiltTransform, PipelineFlag};
use self::request::{RequestContext, RequestTransform};
use self::response::ResponseTransform;

/// Connection-scoped headers that are never forwarded.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// A route's compiled transforms.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    copy_request_headers: bool,
    use_original_host: bool,
    copy_response_headers: bool,
    copy_response_trailers: bool,
    request: Vec<RequestTransform>,
    response: Vec<ResponseTransform>,
    trailers: Vec<ResponseTransform>,
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self {
            copy_request_headers: true,
            use_original_host: false,
            copy_response_headers: true,
            copy_response_trailers: true,
            request: Vec::new(),
            response: Vec::new(),
            trailers: Vec::new(),
        }
    }
}

impl TransformPipeline {
    /// Compile descriptors; errors are collected across all descriptors.
    pub fn build(descriptors: &[TransformDescriptor]) -> Result<Self, Vec<String>> {
        let mut pipeline = Self::default();
        let mut errors = Vec::new();
        for (index, descriptor) in descriptors.iter().enumerate() {
            match build_transform(descriptor) {
                Ok(BuiltTransform::Request(t)) => pipeline.request.push(t),
                Ok(BuiltTransform::Response(t)) => pipeline.response.push(t),
                Ok(BuiltTransform::Trailer(t)) => pipeline.trailers.push(t),
                Ok(BuiltTransform::Flag(flag, value)) => match flag {
                    PipelineFlag::CopyRequestHeaders => pipeline.copy_request_headers = value,
                    PipelineFlag::UseOriginalHost => pipeline.use_original_host = value,
                    PipelineFlag::CopyResponseHeaders => pipeline.copy_response_headers = value,
                    PipelineFlag::CopyResponseTrailers => pipeline.copy_response_trailers = value,
                },
                Err(e) => errors.push(format!("transform #{}: {}", index, e)),
            }
        }
        if errors.is_empty() {
            Ok(pipeline)
        } else {
            Err(errors)
        }
    }

    /// Number of request, response and trailer transforms.
    pub fn len(&self) -> usize {
        self.request.len() + self.response.len() + self.trailers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn copies_response_headers(&self) -> bool {
        self.copy_response_headers
    }

    pub fn copies_response_trailers(&self) -> bool {
        self.copy_response_trailers
    }

    /// Produce the outgoing request.
    pub fn apply_request(&self, request: &ProxyRequest, route_values: &RouteValues) -> OutgoingRequest {
        let mut outgoing = OutgoingRequest::from_request(request);
        if self.copy_request_headers {
            outgoing.headers = forwardable(&request.headers);
        }
        if self.use_original_host {
            if let Some(host) = request.headers.get(header::HOST) {
                outgoing.headers.insert(header::HOST, host.clone());
            }
        }
        let mut ctx = RequestContext {
            request,
            route_values,
            outgoing: &mut outgoing,
        };
        for transform in &self.request {
            transform.apply(&mut ctx);
        }
        outgoing
    }

    /// Apply response header transforms.
    pub fn apply_response(&self, response: &mut ProxyResponse) {
        for transform in &self.response {
            transform.apply(response.status, &mut response.headers);
        }
    }

    /// Apply response trailer transforms.
    pub fn apply_trailers(&self, response: &mut ProxyResponse) {
        for transform in &self.trailers {
            transform.apply(response.status, &mut response.trailers);
        }
    }
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut copied = headers.clone();
    copied.remove(header::HOST);
    for name in &HOP_BY_HOP {
        copied.remove(name);
    }
    copied
}
