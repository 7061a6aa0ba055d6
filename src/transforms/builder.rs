//! Compiles transform descriptors into typed transforms.
//!
//! Keys are matched case-insensitively. Each descriptor carries exactly one
//! primary key (the transform name) plus that transform's parameters; any
//! other key is an error.

use axum::http::{HeaderName, HeaderValue, Method};

use crate::config::schema::TransformDescriptor;
use crate::transforms::forwarded::{
    ForwardedTransform, NodeFormat, XForwardedComponents, XForwardedTransform, DEFAULT_X_FORWARDED_PREFIX,
};
use crate::transforms::request::{PathTemplate, RequestTransform, ValueAction};
use crate::transforms::response::{HeaderEdit, ResponseCondition, ResponseTransform};

const PRIMARY_KEYS: &[&str] = &[
    "PathPattern",
    "PathSet",
    "PathPrefix",
    "PathRemovePrefix",
    "QueryValueParameter",
    "QueryRouteParameter",
    "QueryRemoveParameter",
    "HttpMethodChange",
    "RequestHeadersCopy",
    "RequestHeaderOriginalHost",
    "RequestHeader",
    "RequestHeaderRemove",
    "ResponseHeadersCopy",
    "ResponseTrailersCopy",
    "ResponseHeader",
    "ResponseHeaderRemove",
    "ResponseTrailer",
    "ResponseTrailerRemove",
    "X-Forwarded",
    "Forwarded",
    "ClientCert",
];

/// Pipeline-level switches set by flag descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineFlag {
    CopyRequestHeaders,
    UseOriginalHost,
    CopyResponseHeaders,
    CopyResponseTrailers,
}

/// One compiled descriptor.
#[derive(Debug, Clone)]
pub enum BuiltTransform {
    Request(RequestTransform),
    Response(ResponseTransform),
    Trailer(ResponseTransform),
    Flag(PipelineFlag, bool),
}

struct Entries<'a> {
    entries: Vec<(&'a str, &'a str)>,
    used: Vec<bool>,
}

impl<'a> Entries<'a> {
    fn new(descriptor: &'a TransformDescriptor) -> Self {
        let entries: Vec<_> = descriptor.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let used = vec![false; entries.len()];
        Self { entries, used }
    }

    fn take(&mut self, key: &str) -> Option<&'a str> {
        let index = self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        self.used[index] = true;
        Some(self.entries[index].1)
    }

    fn finish(self) -> Result<(), String> {
        let unused: Vec<&str> = self
            .entries
            .iter()
            .zip(&self.used)
            .filter(|(_, used)| !**used)
            .map(|((k, _), _)| *k)
            .collect();
        if unused.is_empty() {
            Ok(())
        } else {
            Err(format!("unexpected transform parameter(s) {}", unused.join(", ")))
        }
    }

    fn value_action(&mut self, transform: &str) -> Result<(&'a str, ValueAction), String> {
        match (self.take("Append"), self.take("Set")) {
            (Some(value), None) => Ok((value, ValueAction::Append)),
            (None, Some(value)) => Ok((value, ValueAction::Set)),
            _ => Err(format!("{} requires exactly one of Append or Set", transform)),
        }
    }

    fn when(&mut self) -> Result<ResponseCondition, String> {
        self.take("When")
            .map(ResponseCondition::parse)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    fn action(&mut self) -> Result<ValueAction, String> {
        match self.take("Action") {
            None | Some("Set") => Ok(ValueAction::Set),
            Some("Append") => Ok(ValueAction::Append),
            Some(other) => Err(format!("unknown Action {:?}", other)),
        }
    }
}

/// Compile one descriptor.
pub fn build_transform(descriptor: &TransformDescriptor) -> Result<BuiltTransform, String> {
    let primaries: Vec<&str> = PRIMARY_KEYS
        .iter()
        .copied()
        .filter(|key| descriptor.keys().any(|k| k.eq_ignore_ascii_case(key)))
        .collect();
    let primary = match primaries.as_slice() {
        [primary] => *primary,
        [] => {
            let keys: Vec<&str> = descriptor.keys().map(String::as_str).collect();
            return Err(format!("unknown transform [{}]", keys.join(", ")));
        }
        many => return Err(format!("ambiguous transform, found {}", many.join(", "))),
    };

    let mut entries = Entries::new(descriptor);
    let value = entries.take(primary).unwrap_or_default();
    let built = match primary {
        "PathPattern" => BuiltTransform::Request(RequestTransform::PathPattern(PathTemplate::parse(value)?)),
        "PathSet" => BuiltTransform::Request(RequestTransform::PathSet(path(value)?)),
        "PathPrefix" => BuiltTransform::Request(RequestTransform::PathPrefix(path(value)?)),
        "PathRemovePrefix" => BuiltTransform::Request(RequestTransform::PathRemovePrefix(path(value)?)),
        "QueryValueParameter" => {
            let (query_value, action) = entries.value_action(primary)?;
            BuiltTransform::Request(RequestTransform::QueryValue {
                key: non_empty(primary, value)?,
                value: query_value.to_string(),
                action,
            })
        }
        "QueryRouteParameter" => {
            let (route_value, action) = entries.value_action(primary)?;
            BuiltTransform::Request(RequestTransform::QueryRouteValue {
                key: non_empty(primary, value)?,
                route_value: non_empty(primary, route_value)?,
                action,
            })
        }
        "QueryRemoveParameter" => BuiltTransform::Request(RequestTransform::QueryRemove(non_empty(primary, value)?)),
        "HttpMethodChange" => {
            let to = entries.take("Set").ok_or("HttpMethodChange requires Set")?;
            BuiltTransform::Request(RequestTransform::MethodChange {
                from: method(value)?,
                to: method(to)?,
            })
        }
        "RequestHeadersCopy" => BuiltTransform::Flag(PipelineFlag::CopyRequestHeaders, flag(primary, value)?),
        "RequestHeaderOriginalHost" => BuiltTransform::Flag(PipelineFlag::UseOriginalHost, flag(primary, value)?),
        "ResponseHeadersCopy" => BuiltTransform::Flag(PipelineFlag::CopyResponseHeaders, flag(primary, value)?),
        "ResponseTrailersCopy" => BuiltTransform::Flag(PipelineFlag::CopyResponseTrailers, flag(primary, value)?),
        "RequestHeader" => {
            let (header_value, action) = entries.value_action(primary)?;
            BuiltTransform::Request(RequestTransform::Header {
                name: header_name(value)?,
                value: header_value_of(header_value)?,
                action,
            })
        }
        "RequestHeaderRemove" => BuiltTransform::Request(RequestTransform::HeaderRemove(header_name(value)?)),
        "ResponseHeader" | "ResponseTrailer" => {
            let (header_value, action) = entries.value_action(primary)?;
            let transform = ResponseTransform {
                name: header_name(value)?,
                edit: HeaderEdit::Value(header_value_of(header_value)?, action),
                when: entries.when()?,
            };
            if primary == "ResponseHeader" {
                BuiltTransform::Response(transform)
            } else {
                BuiltTransform::Trailer(transform)
            }
        }
        "ResponseHeaderRemove" | "ResponseTrailerRemove" => {
            let transform = ResponseTransform {
                name: header_name(value)?,
                edit: HeaderEdit::Remove,
                when: entries.when()?,
            };
            if primary == "ResponseHeaderRemove" {
                BuiltTransform::Response(transform)
            } else {
                BuiltTransform::Trailer(transform)
            }
        }
        "X-Forwarded" => {
            let components = XForwardedComponents::parse(value)?;
            let action = entries.action()?;
            let prefix = entries.take("HeaderPrefix").unwrap_or(DEFAULT_X_FORWARDED_PREFIX);
            BuiltTransform::Request(RequestTransform::XForwarded(XForwardedTransform::new(
                components, action, prefix,
            )?))
        }
        "Forwarded" => {
            let action = entries.action()?;
            let for_format = entries.take("ForFormat").map(NodeFormat::parse).transpose()?;
            let by_format = entries.take("ByFormat").map(NodeFormat::parse).transpose()?;
            BuiltTransform::Request(RequestTransform::Forwarded(ForwardedTransform::parse(
                value,
                action,
                for_format.unwrap_or(NodeFormat::Random),
                by_format.unwrap_or(NodeFormat::Random),
            )?))
        }
        "ClientCert" => BuiltTransform::Request(RequestTransform::ClientCert(header_name(value)?)),
        other => return Err(format!("unknown transform {}", other)),
    };
    entries.finish()?;
    Ok(built)
}

fn path(value: &str) -> Result<String, String> {
    if value.starts_with('/') {
        Ok(value.to_string())
    } else {
        Err(format!("path {:?} must start with '/'", value))
    }
}

fn non_empty(transform: &str, value: &str) -> Result<String, String> {
    if value.is_empty() {
        Err(format!("{} requires a non-empty value", transform))
    } else {
        Ok(value.to_string())
    }
}

fn flag(transform: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(format!("{} expects true or false, got {:?}", transform, value)),
    }
}

fn method(value: &str) -> Result<Method, String> {
    Method::from_bytes(value.to_ascii_uppercase().as_bytes()).map_err(|_| format!("invalid HTTP method {:?}", value))
}

fn header_name(value: &str) -> Result<HeaderName, String> {
    HeaderName::from_bytes(value.as_bytes()).map_err(|_| format!("invalid header name {:?}", value))
}

fn header_value_of(value: &str) -> Result<HeaderValue, String> {
    HeaderValue::from_str(value).map_err(|_| format!("invalid header value {:?}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(pairs: &[(&str, &str)]) -> TransformDescriptor {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let built = build_transform(&descriptor(&[("requestheader", "X-Tenant"), ("set", "blue")])).unwrap();
        assert!(matches!(
            built,
            BuiltTransform::Request(RequestTransform::Header { action: ValueAction::Set, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_descriptors() {
        assert!(build_transform(&descriptor(&[("PathShuffle", "/x")]))
            .unwrap_err()
            .starts_with("unknown transform"));
        assert!(build_transform(&descriptor(&[("PathSet", "/a"), ("PathPrefix", "/b")]))
            .unwrap_err()
            .starts_with("ambiguous"));
        assert!(build_transform(&descriptor(&[("PathSet", "/a"), ("Extra", "1")]))
            .unwrap_err()
            .contains("Extra"));
        assert!(build_transform(&descriptor(&[("RequestHeader", "X-A")])).is_err());
        assert!(build_transform(&descriptor(&[("ResponseHeader", "X-A"), ("Set", "1"), ("When", "Never")])).is_err());
        assert!(build_transform(&descriptor(&[("RequestHeadersCopy", "maybe")])).is_err());
        assert!(build_transform(&descriptor(&[]))
            .unwrap_err()
            .starts_with("unknown transform"));
    }

    #[test]
    fn test_builds_each_family() {
        let cases = [
            descriptor(&[("PathPattern", "/foo/{x}")]),
            descriptor(&[("QueryValueParameter", "a"), ("Append", "1")]),
            descriptor(&[("HttpMethodChange", "put"), ("Set", "post")]),
            descriptor(&[("ResponseTrailerRemove", "grpc-message"), ("When", "Always")]),
            descriptor(&[("X-Forwarded", "for,proto"), ("Action", "Append"), ("HeaderPrefix", "X-Edge-")]),
            descriptor(&[("Forwarded", "by,for"), ("ForFormat", "IpAndPort"), ("ByFormat", "Unknown")]),
            descriptor(&[("ClientCert", "X-Client-Cert")]),
        ];
        for case in &cases {
            assert!(build_transform(case).is_ok(), "{:?}", case);
        }
        assert!(matches!(
            build_transform(&descriptor(&[("RequestHeaderOriginalHost", "True")])).unwrap(),
            BuiltTransform::Flag(PipelineFlag::UseOriginalHost, true)
        ));
    }
}
