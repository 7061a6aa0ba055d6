//! Response header and trailer transforms.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::transforms::request::{apply_header, ValueAction};

/// `When` gate for response and trailer transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseCondition {
    Always,
    /// Status below 400.
    #[default]
    Success,
    /// Status 400 or above.
    Failure,
}

impl ResponseCondition {
    pub fn parse(name: &str) -> Result<Self, String> {
        match name {
            "Always" => Ok(Self::Always),
            "Success" => Ok(Self::Success),
            "Failure" => Ok(Self::Failure),
            other => Err(format!("unknown When condition {:?}", other)),
        }
    }

    pub fn applies(&self, status: StatusCode) -> bool {
        match self {
            Self::Always => true,
            Self::Success => status.as_u16() < 400,
            Self::Failure => status.as_u16() >= 400,
        }
    }
}

#[derive(Debug, Clone)]
pub enum HeaderEdit {
    Value(HeaderValue, ValueAction),
    Remove,
}

/// One compiled `ResponseHeader*` or `ResponseTrailer*` transform.
#[derive(Debug, Clone)]
pub struct ResponseTransform {
    pub name: HeaderName,
    pub edit: HeaderEdit,
    pub when: ResponseCondition,
}

impl ResponseTransform {
    /// Apply to `headers` (response headers or trailers) if `when` holds.
    pub fn apply(&self, status: StatusCode, headers: &mut HeaderMap) {
        if !self.when.applies(status) {
            return;
        }
        match &self.edit {
            HeaderEdit::Value(value, action) => apply_header(headers, &self.name, value, *action),
            HeaderEdit::Remove => {
                headers.remove(&self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_when_conditions() {
        let transform = ResponseTransform {
            name: HeaderName::from_static("x-served-by"),
            edit: HeaderEdit::Value(HeaderValue::from_static("proxy"), ValueAction::Set),
            when: ResponseCondition::default(),
        };
        let mut headers = HeaderMap::new();
        transform.apply(StatusCode::INTERNAL_SERVER_ERROR, &mut headers);
        assert!(headers.is_empty());
        transform.apply(StatusCode::NOT_MODIFIED, &mut headers);
        assert_eq!(headers["x-served-by"], "proxy");

        let remove = ResponseTransform {
            name: HeaderName::from_static("x-served-by"),
            edit: HeaderEdit::Remove,
            when: ResponseCondition::Failure,
        };
        remove.apply(StatusCode::OK, &mut headers);
        assert!(headers.contains_key("x-served-by"));
        remove.apply(StatusCode::BAD_GATEWAY, &mut headers);
        assert!(headers.is_empty());
    }
}
