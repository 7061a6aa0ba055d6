//! Route path patterns.
//!
//! Supported syntax:
//! - literal segments: `/api/widgets` (compared ASCII case-insensitively)
//! - single-segment captures: `/api/{plugin}`
//! - one trailing catch-all capture: `/files/{*rest}` or `/files/{**rest}`
//!
//! Patterns are parsed once when a snapshot is built; matching walks the
//! segments without allocating until a capture is recorded.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Values captured from the request path, keyed by parameter name.
pub type RouteValues = BTreeMap<String, String>;

/// Why a path pattern was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("path pattern must start with '/': {0:?}")]
    MissingLeadingSlash(String),
    #[error("path pattern contains an empty segment: {0:?}")]
    EmptySegment(String),
    #[error("malformed segment {0:?}")]
    MalformedSegment(String),
    #[error("invalid parameter name {0:?}")]
    InvalidParameterName(String),
    #[error("duplicate parameter name {0:?}")]
    DuplicateParameter(String),
    #[error("catch-all parameter {0:?} must be the last segment")]
    CatchAllNotLast(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Parameter(String),
    CatchAll(String),
}

/// How specific a pattern is. Larger sorts first among routes of equal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct PathSpecificity {
    literals: usize,
    parameters: usize,
    bounded: bool,
}

/// A parsed route path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parse a pattern, rejecting anything outside the supported syntax.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let rest = pattern
            .strip_prefix('/')
            .ok_or_else(|| PatternError::MissingLeadingSlash(pattern.to_string()))?;
        let rest = rest.strip_suffix('/').unwrap_or(rest);

        let mut segments = Vec::new();
        if !rest.is_empty() {
            for raw in rest.split('/') {
                if raw.is_empty() {
                    return Err(PatternError::EmptySegment(pattern.to_string()));
                }
                segments.push(parse_segment(raw)?);
            }
        }

        let mut seen = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            let name = match segment {
                Segment::Literal(_) => continue,
                Segment::Parameter(name) => name,
                Segment::CatchAll(name) => {
                    if i + 1 != segments.len() {
                        return Err(PatternError::CatchAllNotLast(name.clone()));
                    }
                    name
                }
            };
            if seen.contains(&name) {
                return Err(PatternError::DuplicateParameter(name.clone()));
            }
            seen.push(name);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a request path, returning the captured values on success.
    pub fn matches(&self, path: &str) -> Option<RouteValues> {
        let rest = path.strip_prefix('/').unwrap_or(path);
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        let mut parts = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };

        let mut values = RouteValues::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    let part = parts.get(i)?;
                    if !part.eq_ignore_ascii_case(literal) {
                        return None;
                    }
                }
                Segment::Parameter(name) => {
                    let part = parts.get(i)?;
                    if part.is_empty() {
                        return None;
                    }
                    values.insert(name.clone(), (*part).to_string());
                }
                Segment::CatchAll(name) => {
                    let remainder = if i < parts.len() {
                        parts.split_off(i).join("/")
                    } else {
                        String::new()
                    };
                    values.insert(name.clone(), remainder);
                    return Some(values);
                }
            }
        }

        if parts.len() == self.segments.len() {
            Some(values)
        } else {
            None
        }
    }

    /// Specificity used to order routes of equal `order`.
    pub fn specificity(&self) -> PathSpecificity {
        let mut specificity = PathSpecificity {
            bounded: true,
            ..PathSpecificity::default()
        };
        for segment in &self.segments {
            match segment {
                Segment::Literal(_) => specificity.literals += 1,
                Segment::Parameter(_) => specificity.parameters += 1,
                Segment::CatchAll(_) => specificity.bounded = false,
            }
        }
        specificity
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_segment(raw: &str) -> Result<Segment, PatternError> {
    let Some(inner) = raw.strip_prefix('{') else {
        if raw.contains(['{', '}']) {
            return Err(PatternError::MalformedSegment(raw.to_string()));
        }
        return Ok(Segment::Literal(raw.to_string()));
    };
    let inner = inner
        .strip_suffix('}')
        .ok_or_else(|| PatternError::MalformedSegment(raw.to_string()))?;

    let (name, catch_all) = match inner.strip_prefix("**").or_else(|| inner.strip_prefix('*')) {
        Some(name) => (name, true),
        None => (inner, false),
    };
    if !is_valid_name(name) {
        return Err(PatternError::InvalidParameterName(name.to_string()));
    }

    Ok(if catch_all {
        Segment::CatchAll(name.to_string())
    } else {
        Segment::Parameter(name.to_string())
    })
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
