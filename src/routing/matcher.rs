//! Route matching logic.
//!
//! # Responsibilities
//! - Match HTTP method (case-insensitive)
//! - Match host header (exact or `*.` wildcard prefix, case-insensitive)
//! - Match path pattern and capture route values
//! - Match header conditions (Exact, Prefix, Contains, Exists)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host matching is case-insensitive
//! - Path literals compare ASCII case-insensitively
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use axum::http::{HeaderName, Method};

use crate::config::schema::{HeaderMatchConfig, HeaderMatchMode, RouteMatch};
use crate::http::ProxyRequest;
use crate::routing::pattern::{PathPattern, PathSpecificity, RouteValues};

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &ProxyRequest) -> bool;
}

/// Matches the request method against an allowed set.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    methods: Vec<Method>,
}

impl MethodMatcher {
    /// Build a matcher; method names are upper-cased before parsing. Every
    /// invalid name is reported.
    pub fn new(methods: &[String]) -> Result<Self, Vec<String>> {
        let parsed = methods.iter().map(|m| {
            Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| format!("invalid HTTP method {:?}", m))
        });
        collect_all(parsed).map(|methods| Self { methods })
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, req: &ProxyRequest) -> bool {
        self.methods.contains(&req.method)
    }
}

#[derive(Debug, Clone)]
struct HostPattern {
    /// Lowercased host, without the `*.` prefix for wildcards.
    host: String,
    wildcard: bool,
    port: Option<u16>,
}

impl HostPattern {
    fn parse(raw: &str) -> Result<Self, String> {
        let (host, port) = split_host_port(raw);
        let port = port
            .map(|p| p.parse::<u16>().map_err(|_| format!("invalid port in host pattern {:?}", raw)))
            .transpose()?;

        let (host, wildcard) = match host.strip_prefix("*.") {
            Some(rest) => (rest, true),
            None => (host, false),
        };
        if host.is_empty() || host.contains('*') {
            return Err(format!("invalid host pattern {:?}", raw));
        }

        Ok(Self {
            host: host.to_ascii_lowercase(),
            wildcard,
            port,
        })
    }

    fn matches(&self, host: &str, port: Option<u16>) -> bool {
        if self.port.is_some() && self.port != port {
            return false;
        }
        if self.wildcard {
            host.len() > self.host.len() + 1
                && host.ends_with(&self.host)
                && host.as_bytes()[host.len() - self.host.len() - 1] == b'.'
        } else {
            host == self.host
        }
    }
}

/// Keep every success, or every error if there was at least one.
fn collect_all<T>(results: impl Iterator<Item = Result<T, String>>) -> Result<Vec<T>, Vec<String>> {
    let mut values = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() {
        Ok(values)
    } else {
        Err(errors)
    }
}

/// Matches the Host header against exact and wildcard patterns.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    patterns: Vec<HostPattern>,
}

impl HostMatcher {
    /// Create a new host matcher.
    /// Hosts are normalized to lowercase for case-insensitive matching.
    pub fn new(hosts: &[String]) -> Result<Self, Vec<String>> {
        collect_all(hosts.iter().map(|h| HostPattern::parse(h))).map(|patterns| Self { patterns })
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &ProxyRequest) -> bool {
        let Some(raw) = req.host() else {
            return false;
        };
        let (host, port) = split_host_port(raw);
        let host = host.to_ascii_lowercase();
        let port = port.and_then(|p| p.parse().ok());
        self.patterns.iter().any(|p| p.matches(&host, port))
    }
}

/// Matches one header condition.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    name: HeaderName,
    values: Vec<String>,
    mode: HeaderMatchMode,
    case_sensitive: bool,
}

impl HeaderMatcher {
    /// Build a matcher from its configuration.
    pub fn new(config: &HeaderMatchConfig) -> Result<Self, String> {
        let name = HeaderName::from_bytes(config.name.as_bytes())
            .map_err(|_| format!("invalid header name {:?}", config.name))?;
        if config.mode != HeaderMatchMode::Exists && config.values.is_empty() {
            return Err(format!(
                "header match on {:?} with mode {:?} needs at least one value",
                config.name, config.mode
            ));
        }
        let values = if config.is_case_sensitive {
            config.values.clone()
        } else {
            config.values.iter().map(|v| v.to_lowercase()).collect()
        };
        Ok(Self {
            name,
            values,
            mode: config.mode,
            case_sensitive: config.is_case_sensitive,
        })
    }

    fn value_matches(&self, actual: &str) -> bool {
        let lowered;
        let actual = if self.case_sensitive {
            actual
        } else {
            lowered = actual.to_lowercase();
            &lowered
        };
        self.values.iter().any(|expected| match self.mode {
            HeaderMatchMode::Exact => actual == expected,
            HeaderMatchMode::Prefix => actual.starts_with(expected.as_str()),
            HeaderMatchMode::Contains => actual.contains(expected.as_str()),
            HeaderMatchMode::Exists => true,
        })
    }
}

impl Matcher for HeaderMatcher {
    fn matches(&self, req: &ProxyRequest) -> bool {
        let mut values = req.headers.get_all(&self.name).iter().peekable();
        if self.mode == HeaderMatchMode::Exists {
            return values.peek().is_some();
        }
        values
            .filter_map(|v| v.to_str().ok())
            .any(|v| self.value_matches(v))
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }

    fn len(&self) -> usize {
        self.matchers.len()
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &ProxyRequest) -> bool {
        // All matchers must pass (AND)
        self.matchers.iter().all(|m| m.matches(req))
    }
}

/// Ordering key for routes of equal `order`: higher sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct MatchSpecificity {
    path: PathSpecificity,
    has_path: bool,
    conditions: usize,
}

/// All match criteria of one route, compiled.
#[derive(Debug)]
pub struct RouteMatcher {
    path: Option<PathPattern>,
    conditions: AndMatcher,
}

impl RouteMatcher {
    /// Compile match criteria, collecting every problem found.
    pub fn compile(criteria: &RouteMatch) -> Result<Self, Vec<String>> {
        let mut errors = Vec::new();
        let mut conditions: Vec<Box<dyn Matcher>> = Vec::new();

        if let Some(methods) = &criteria.methods {
            match MethodMatcher::new(methods) {
                Ok(m) => conditions.push(Box::new(m)),
                Err(mut e) => errors.append(&mut e),
            }
        }
        if let Some(hosts) = &criteria.hosts {
            match HostMatcher::new(hosts) {
                Ok(m) => conditions.push(Box::new(m)),
                Err(mut e) => errors.append(&mut e),
            }
        }
        for header in &criteria.headers {
            match HeaderMatcher::new(header) {
                Ok(m) => conditions.push(Box::new(m)),
                Err(e) => errors.push(e),
            }
        }

        let path = match criteria.path.as_deref().map(PathPattern::parse).transpose() {
            Ok(path) => path,
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        };

        if criteria.path.is_none() && criteria.hosts.as_ref().map_or(true, Vec::is_empty) {
            errors.push("route must match on a path, hosts, or both".to_string());
        }

        if errors.is_empty() {
            Ok(Self {
                path,
                conditions: AndMatcher::new(conditions),
            })
        } else {
            Err(errors)
        }
    }

    /// Match a request, returning the captured route values on success.
    pub fn match_request(&self, req: &ProxyRequest) -> Option<RouteValues> {
        if !self.conditions.matches(req) {
            return None;
        }
        match &self.path {
            Some(pattern) => pattern.matches(&req.path),
            None => Some(RouteValues::new()),
        }
    }

    /// Specificity used to order routes.
    pub fn specificity(&self) -> MatchSpecificity {
        MatchSpecificity {
            path: self.path.as_ref().map(PathPattern::specificity).unwrap_or_default(),
            has_path: self.path.is_some(),
            conditions: self.conditions.len(),
        }
    }
}

/// Split `host[:port]`, leaving bracketed IPv6 literals intact.
fn split_host_port(raw: &str) -> (&str, Option<&str>) {
    if raw.starts_with('[') {
        return match raw.find(']') {
            Some(end) => {
                let port = raw[end + 1..].strip_prefix(':');
                (&raw[..=end], port)
            }
            None => (raw, None),
        };
    }
    match raw.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (raw, None),
    }
}
