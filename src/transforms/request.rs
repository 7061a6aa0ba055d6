//! Request transforms: path, query, method and header rewrites.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::http::{OutgoingRequest, ProxyRequest};
use crate::routing::pattern::RouteValues;
use crate::transforms::forwarded::{ForwardedTransform, XForwardedTransform};

/// Everything a request transform may read or write.
pub struct RequestContext<'a> {
    pub request: &'a ProxyRequest,
    pub route_values: &'a RouteValues,
    pub outgoing: &'a mut OutgoingRequest,
}

/// `Append` adds a value; `Set` replaces all existing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueAction {
    Append,
    Set,
}

/// A compiled request transform.
#[derive(Debug, Clone)]
pub enum RequestTransform {
    PathSet(String),
    PathPrefix(String),
    PathRemovePrefix(String),
    PathPattern(PathTemplate),
    QueryValue {
        key: String,
        value: String,
        action: ValueAction,
    },
    QueryRouteValue {
        key: String,
        route_value: String,
        action: ValueAction,
    },
    QueryRemove(String),
    MethodChange {
        from: Method,
        to: Method,
    },
    Header {
        name: HeaderName,
        value: HeaderValue,
        action: ValueAction,
    },
    HeaderRemove(HeaderName),
    XForwarded(XForwardedTransform),
    Forwarded(ForwardedTransform),
    ClientCert(HeaderName),
}

impl RequestTransform {
    pub fn apply(&self, ctx: &mut RequestContext<'_>) {
        let outgoing = &mut *ctx.outgoing;
        match self {
            Self::PathSet(path) => outgoing.path = path.clone(),
            Self::PathPrefix(prefix) => {
                outgoing.path = format!("{}{}", prefix.trim_end_matches('/'), outgoing.path);
            }
            Self::PathRemovePrefix(prefix) => {
                if let Some(rest) = strip_path_prefix(&outgoing.path, prefix) {
                    outgoing.path = if rest.is_empty() { "/".to_string() } else { rest.to_string() };
                }
            }
            Self::PathPattern(template) => outgoing.path = template.render(ctx.route_values),
            Self::QueryValue { key, value, action } => {
                set_query(&mut outgoing.query, key, value, *action);
            }
            Self::QueryRouteValue {
                key,
                route_value,
                action,
            } => {
                if let Some(value) = ctx.route_values.get(route_value) {
                    set_query(&mut outgoing.query, key, value, *action);
                }
            }
            Self::QueryRemove(key) => outgoing.query.retain(|(k, _)| k != key),
            Self::MethodChange { from, to } => {
                if outgoing.method == *from {
                    outgoing.method = to.clone();
                }
            }
            Self::Header { name, value, action } => {
                apply_header(&mut outgoing.headers, name, value, *action);
            }
            Self::HeaderRemove(name) => {
                outgoing.headers.remove(name);
            }
            Self::XForwarded(transform) => transform.apply(ctx.request, &mut outgoing.headers),
            Self::Forwarded(transform) => transform.apply(ctx.request, &mut outgoing.headers),
            Self::ClientCert(name) => {
                outgoing.headers.remove(name);
                let encoded = ctx
                    .request
                    .client_certificate
                    .as_deref()
                    .and_then(|der| HeaderValue::from_str(&STANDARD.encode(der)).ok());
                if let Some(value) = encoded {
                    outgoing.headers.insert(name.clone(), value);
                }
            }
        }
    }
}

/// Header `Append` / `Set`. An empty `Set` removes the header.
pub(crate) fn apply_header(
    headers: &mut HeaderMap,
    name: &HeaderName,
    value: &HeaderValue,
    action: ValueAction,
) {
    match action {
        ValueAction::Append => {
            headers.append(name.clone(), value.clone());
        }
        ValueAction::Set if value.is_empty() => {
            headers.remove(name);
        }
        ValueAction::Set => {
            headers.insert(name.clone(), value.clone());
        }
    }
}

fn set_query(query: &mut Vec<(String, String)>, key: &str, value: &str, action: ValueAction) {
    if action == ValueAction::Set {
        if let Some(pos) = query.iter().position(|(k, _)| k == key) {
            query[pos].1 = value.to_string();
            let mut index = 0;
            query.retain(|(k, _)| {
                let keep = k != key || index == pos;
                index += 1;
                keep
            });
            return;
        }
    }
    query.push((key.to_string(), value.to_string()));
}

/// Segment-aware, case-insensitive prefix strip.
fn strip_path_prefix<'p>(path: &'p str, prefix: &str) -> Option<&'p str> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return None;
    }
    let head = path.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = &path[prefix.len()..];
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Value(String),
}

/// Path template such as `/foo/{plugin}/bar/{remainder}`. `{*x}` and `{**x}`
/// are accepted as aliases of `{x}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    parts: Vec<TemplatePart>,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self, String> {
        if !template.starts_with('/') {
            return Err(format!("path template {:?} must start with '/'", template));
        }
        let mut parts = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                parts.push(TemplatePart::Literal(rest[..open].to_string()));
            }
            let close = rest[open..]
                .find('}')
                .map(|i| open + i)
                .ok_or_else(|| format!("unclosed '{{' in path template {:?}", template))?;
            let name = rest[open + 1..close].trim_start_matches('*');
            if name.is_empty() || name.contains('{') {
                return Err(format!("invalid parameter in path template {:?}", template));
            }
            parts.push(TemplatePart::Value(name.to_string()));
            rest = &rest[close + 1..];
        }
        if rest.contains('}') {
            return Err(format!("unmatched '}}' in path template {:?}", template));
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Literal(rest.to_string()));
        }
        Ok(Self { parts })
    }

    /// Substitute route values; a missing value renders as empty.
    pub fn render(&self, values: &RouteValues) -> String {
        let mut path = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => path.push_str(text),
                TemplatePart::Value(name) => {
                    if let Some(value) = values.get(name) {
                        path.push_str(value);
                    }
                }
            }
        }
        path
    }
}
