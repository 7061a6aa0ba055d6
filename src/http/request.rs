//! Request views used by the decision core.
//!
//! # Responsibilities
//! - Describe the inbound request as seen by the listener (`ProxyRequest`)
//! - Hold the outgoing request being built by transforms (`OutgoingRequest`)
//! - Render the outgoing URI against a chosen destination
//!
//! # Design Decisions
//! - Bodies never pass through here; the forwarding collaborator streams them
//! - Query parameters are kept as an ordered list so transforms can edit them
//!   without re-parsing the query string per transform

use std::net::SocketAddr;

use axum::http::{header::HOST, request::Parts, HeaderMap, Method, Uri};
use url::{form_urlencoded, Url};

/// Inbound request metadata.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// `http` or `https`.
    pub scheme: String,
    /// Authority from the request target (HTTP/2) if any. Falls back to the
    /// `Host` header in [`ProxyRequest::host`].
    pub host: Option<String>,
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    /// Path prefix the listener stripped before routing, if any.
    pub path_base: String,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
    /// DER-encoded client certificate presented on the connection.
    pub client_certificate: Option<Vec<u8>>,
}

impl ProxyRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            scheme: "http".to_string(),
            host: None,
            path: path.into(),
            query: None,
            path_base: String::new(),
            headers: HeaderMap::new(),
            remote_addr: None,
            local_addr: None,
            client_certificate: None,
        }
    }

    /// Build a request view from the parts of an inbound `http::Request`.
    pub fn from_parts(parts: &Parts, remote_addr: Option<SocketAddr>) -> Self {
        let uri = &parts.uri;
        Self {
            method: parts.method.clone(),
            scheme: uri.scheme_str().unwrap_or("http").to_string(),
            host: uri.authority().map(|a| a.as_str().to_string()),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            path_base: String::new(),
            headers: parts.headers.clone(),
            remote_addr,
            local_addr: None,
            client_certificate: None,
        }
    }

    /// Request host including any port: request-target authority first, then
    /// the `Host` header.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref().or_else(|| {
            self.headers
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
        })
    }

    /// Decoded query parameters in order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .as_deref()
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default()
    }
}

/// The request that will be sent to the destination.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
}

impl OutgoingRequest {
    /// Start from the inbound request with no headers; header copying is
    /// decided by the transform pipeline.
    pub fn from_request(request: &ProxyRequest) -> Self {
        Self {
            method: request.method.clone(),
            path: request.path.clone(),
            query: request.query_pairs(),
            headers: HeaderMap::new(),
        }
    }

    /// Encoded query string, `None` when there are no parameters.
    pub fn query_string(&self) -> Option<String> {
        if self.query.is_empty() {
            return None;
        }
        Some(
            form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.query.iter())
                .finish(),
        )
    }

    /// Target URI on `destination`: the destination's own path is used as a
    /// prefix for the outgoing path.
    pub fn uri_for(&self, destination: &Url) -> Result<Uri, String> {
        let mut uri = destination.as_str().trim_end_matches('/').to_string();
        if !self.path.starts_with('/') {
            uri.push('/');
        }
        uri.push_str(&self.path);
        if let Some(query) = self.query_string() {
            uri.push('?');
            uri.push_str(&query);
        }
        uri.parse::<Uri>()
            .map_err(|e| format!("invalid outgoing uri {:?}: {}", uri, e))
    }
}
