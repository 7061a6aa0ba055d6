//! `X-Forwarded-*` and RFC 7239 `Forwarded` header transforms.

use std::net::SocketAddr;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::http::ProxyRequest;
use crate::transforms::request::ValueAction;

pub const DEFAULT_X_FORWARDED_PREFIX: &str = "X-Forwarded-";

/// Which `X-Forwarded-*` headers to emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XForwardedComponents {
    pub for_: bool,
    pub proto: bool,
    pub host: bool,
    pub prefix: bool,
}

impl XForwardedComponents {
    pub fn parse(list: &str) -> Result<Self, String> {
        let mut components = Self::default();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item.to_ascii_lowercase().as_str() {
                "for" => components.for_ = true,
                "proto" => components.proto = true,
                "host" => components.host = true,
                "prefix" => components.prefix = true,
                other => return Err(format!("unknown X-Forwarded component {:?}", other)),
            }
        }
        if components == Self::default() {
            return Err("X-Forwarded requires at least one of for, proto, host, prefix".to_string());
        }
        Ok(components)
    }
}

/// Emits `<prefix>For`, `<prefix>Proto`, `<prefix>Host`, `<prefix>Prefix`.
#[derive(Debug, Clone)]
pub struct XForwardedTransform {
    action: ValueAction,
    headers: Vec<(XForwardedField, HeaderName)>,
}

#[derive(Debug, Clone, Copy)]
enum XForwardedField {
    For,
    Proto,
    Host,
    Prefix,
}

impl XForwardedTransform {
    pub fn new(components: XForwardedComponents, action: ValueAction, prefix: &str) -> Result<Self, String> {
        let selected = [
            (components.for_, XForwardedField::For, "For"),
            (components.proto, XForwardedField::Proto, "Proto"),
            (components.host, XForwardedField::Host, "Host"),
            (components.prefix, XForwardedField::Prefix, "Prefix"),
        ];
        let mut headers = Vec::new();
        for (enabled, field, suffix) in selected {
            if !enabled {
                continue;
            }
            let name = format!("{}{}", prefix, suffix);
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| format!("invalid X-Forwarded header name {:?}", name))?;
            headers.push((field, name));
        }
        Ok(Self { action, headers })
    }

    pub fn apply(&self, request: &ProxyRequest, headers: &mut HeaderMap) {
        for (field, name) in &self.headers {
            let value = match field {
                XForwardedField::For => request.remote_addr.map(|a| a.ip().to_string()),
                XForwardedField::Proto => Some(request.scheme.clone()),
                XForwardedField::Host => request.host().map(str::to_string),
                XForwardedField::Prefix => Some(request.path_base.clone()).filter(|p| !p.is_empty()),
            };
            merge_list_header(headers, name, value, self.action);
        }
    }
}

/// How a node (`for` / `by`) is rendered in a `Forwarded` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFormat {
    Random,
    RandomAndPort,
    RandomAndRandomPort,
    Unknown,
    UnknownAndPort,
    UnknownAndRandomPort,
    Ip,
    IpAndPort,
    IpAndRandomPort,
}

impl NodeFormat {
    pub fn parse(name: &str) -> Result<Self, String> {
        Ok(match name {
            "Random" => Self::Random,
            "RandomAndPort" => Self::RandomAndPort,
            "RandomAndRandomPort" => Self::RandomAndRandomPort,
            "Unknown" => Self::Unknown,
            "UnknownAndPort" => Self::UnknownAndPort,
            "UnknownAndRandomPort" => Self::UnknownAndRandomPort,
            "Ip" => Self::Ip,
            "IpAndPort" => Self::IpAndPort,
            "IpAndRandomPort" => Self::IpAndRandomPort,
            other => return Err(format!("unknown Forwarded node format {:?}", other)),
        })
    }

    /// Render a node. Addresses that are not known fall back to `unknown`.
    pub fn render(&self, addr: Option<SocketAddr>) -> String {
        let port = addr.map(|a| a.port().to_string());
        let (node, port) = match self {
            Self::Random => (obfuscated(), None),
            Self::RandomAndPort => (obfuscated(), port.or_else(|| Some("unknown".into()))),
            Self::RandomAndRandomPort => (obfuscated(), Some(obfuscated())),
            Self::Unknown => ("unknown".to_string(), None),
            Self::UnknownAndPort => ("unknown".to_string(), port.or_else(|| Some("unknown".into()))),
            Self::UnknownAndRandomPort => ("unknown".to_string(), Some(obfuscated())),
            Self::Ip | Self::IpAndPort | Self::IpAndRandomPort => {
                let Some(addr) = addr else {
                    return "unknown".to_string();
                };
                let ip = match addr {
                    SocketAddr::V4(v4) => v4.ip().to_string(),
                    SocketAddr::V6(v6) => format!("[{}]", v6.ip()),
                };
                let port = match self {
                    Self::IpAndPort => port,
                    Self::IpAndRandomPort => Some(obfuscated()),
                    _ => None,
                };
                (ip, port)
            }
        };
        match port {
            Some(port) => format!("\"{}:{}\"", node, port),
            // IPv6 literals contain ':' and must be quoted
            None if node.contains(':') => format!("\"{}\"", node),
            None => node,
        }
    }
}

fn obfuscated() -> String {
    let id: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("_{}", id)
}

/// Emits one RFC 7239 `Forwarded` element: `proto=..;host=..;for=..;by=..`.
#[derive(Debug, Clone)]
pub struct ForwardedTransform {
    pub proto: bool,
    pub host: bool,
    pub for_format: Option<NodeFormat>,
    pub by_format: Option<NodeFormat>,
    pub action: ValueAction,
}

impl ForwardedTransform {
    /// Parse a component list (`by,for,host,proto`) with node formats.
    pub fn parse(
        list: &str,
        action: ValueAction,
        for_format: NodeFormat,
        by_format: NodeFormat,
    ) -> Result<Self, String> {
        let mut transform = Self {
            proto: false,
            host: false,
            for_format: None,
            by_format: None,
            action,
        };
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item.to_ascii_lowercase().as_str() {
                "proto" => transform.proto = true,
                "host" => transform.host = true,
                "for" => transform.for_format = Some(for_format),
                "by" => transform.by_format = Some(by_format),
                other => return Err(format!("unknown Forwarded component {:?}", other)),
            }
        }
        if !transform.proto && !transform.host && transform.for_format.is_none() && transform.by_format.is_none() {
            return Err("Forwarded requires at least one of by, for, host, proto".to_string());
        }
        Ok(transform)
    }

    pub fn element(&self, request: &ProxyRequest) -> String {
        let mut pairs = Vec::new();
        if self.proto {
            pairs.push(format!("proto={}", request.scheme));
        }
        if self.host {
            if let Some(host) = request.host() {
                pairs.push(format!("host=\"{}\"", host));
            }
        }
        if let Some(format) = self.for_format {
            pairs.push(format!("for={}", format.render(request.remote_addr)));
        }
        if let Some(format) = self.by_format {
            pairs.push(format!("by={}", format.render(request.local_addr)));
        }
        pairs.join(";")
    }

    pub fn apply(&self, request: &ProxyRequest, headers: &mut HeaderMap) {
        let element = self.element(request);
        let value = Some(element).filter(|e| !e.is_empty());
        merge_list_header(headers, &axum::http::header::FORWARDED, value, self.action);
    }
}

/// `Set` replaces (or removes when there is no value); `Append` joins onto any
/// existing comma-separated list.
fn merge_list_header(headers: &mut HeaderMap, name: &HeaderName, value: Option<String>, action: ValueAction) {
    let combined = match action {
        ValueAction::Set => value,
        ValueAction::Append => {
            let existing: Vec<&str> = headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect();
            match (existing.is_empty(), value) {
                (true, value) => value,
                (false, Some(value)) => Some(format!("{}, {}", existing.join(", "), value)),
                (false, None) => return,
            }
        }
    };
    headers.remove(name);
    if let Some(value) = combined.and_then(|v| HeaderValue::from_str(&v).ok()) {
        headers.insert(name.clone(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    fn request() -> ProxyRequest {
        let mut req = ProxyRequest::new(Method::GET, "/");
        req.headers.insert("host", "example.com".parse().unwrap());
        req.remote_addr = Some("10.1.2.3:5555".parse().unwrap());
        req.local_addr = Some("[::1]:443".parse().unwrap());
        req.scheme = "https".into();
        req
    }

    #[test]
    fn test_x_forwarded_append_and_set() {
        let components = XForwardedComponents::parse("for,proto,host").unwrap();
        let append = XForwardedTransform::new(components, ValueAction::Append, DEFAULT_X_FORWARDED_PREFIX).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.1.1.1".parse().unwrap());
        append.apply(&request(), &mut headers);
        assert_eq!(headers["x-forwarded-for"], "1.1.1.1, 10.1.2.3");
        assert_eq!(headers["x-forwarded-proto"], "https");
        assert_eq!(headers["x-forwarded-host"], "example.com");
        assert!(headers.get("x-forwarded-prefix").is_none());

        let set = XForwardedTransform::new(components, ValueAction::Set, "X-Client-").unwrap();
        set.apply(&request(), &mut headers);
        assert_eq!(headers["x-client-for"], "10.1.2.3");
        assert!(XForwardedComponents::parse("for,nope").is_err());
    }

    #[test]
    fn test_forwarded_element() {
        let transform =
            ForwardedTransform::parse("proto,host,for,by", ValueAction::Set, NodeFormat::IpAndPort, NodeFormat::Ip)
                .unwrap();
        assert_eq!(
            transform.element(&request()),
            "proto=https;host=\"example.com\";for=\"10.1.2.3:5555\";by=\"[::1]\""
        );

        let mut headers = HeaderMap::new();
        headers.insert("forwarded", "for=1.1.1.1".parse().unwrap());
        let append = ForwardedTransform::parse("for", ValueAction::Append, NodeFormat::Unknown, NodeFormat::Random)
            .unwrap();
        append.apply(&request(), &mut headers);
        assert_eq!(headers["forwarded"], "for=1.1.1.1, for=unknown");
    }

    #[test]
    fn test_node_formats() {
        let addr: Option<SocketAddr> = Some("192.168.0.1:80".parse().unwrap());
        assert!(NodeFormat::Random.render(addr).starts_with('_'));
        assert_eq!(NodeFormat::UnknownAndPort.render(addr), "\"unknown:80\"");
        assert_eq!(NodeFormat::Ip.render(addr), "192.168.0.1");
        assert_eq!(NodeFormat::Ip.render(None), "unknown");
        assert!(NodeFormat::IpAndRandomPort.render(addr).starts_with("\"192.168.0.1:_"));
        assert!(NodeFormat::parse("Bogus").is_err());
    }
}
