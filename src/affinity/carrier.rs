//! Where the affinity key travels: a cookie or a custom header.

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::schema::CookieConfig;

/// Default cookie name.
pub const DEFAULT_COOKIE_NAME: &str = ".Proxy.Affinity";
/// Default header name.
pub const DEFAULT_HEADER_NAME: &str = "X-Proxy-Affinity";

/// Cookie attributes, validated.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    path: Option<String>,
    domain: Option<String>,
    http_only: bool,
    secure: bool,
    same_site: Option<&'static str>,
    max_age_secs: Option<u64>,
}

impl CookieSettings {
    pub fn from_config(config: &CookieConfig) -> Result<Self, String> {
        let same_site = match config.same_site.as_deref() {
            None => None,
            Some(v) if v.eq_ignore_ascii_case("lax") => Some("Lax"),
            Some(v) if v.eq_ignore_ascii_case("strict") => Some("Strict"),
            Some(v) if v.eq_ignore_ascii_case("none") => Some("None"),
            Some(other) => return Err(format!("invalid cookie same_site {:?}", other)),
        };
        Ok(Self {
            path: config.path.clone(),
            domain: config.domain.clone(),
            http_only: config.http_only,
            secure: config.secure,
            same_site,
            max_age_secs: config.max_age_secs,
        })
    }

    fn render(&self, name: &str, value: &str) -> String {
        let mut cookie = format!("{}={}", name, value);
        if let Some(path) = &self.path {
            cookie.push_str("; Path=");
            cookie.push_str(path);
        }
        if let Some(domain) = &self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if let Some(max_age) = self.max_age_secs {
            cookie.push_str(&format!("; Max-Age={}", max_age));
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        if let Some(same_site) = self.same_site {
            cookie.push_str("; SameSite=");
            cookie.push_str(same_site);
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        cookie
    }
}

/// The carrier of a cluster's affinity key.
#[derive(Debug, Clone)]
pub enum AffinityCarrier {
    Cookie {
        name: String,
        settings: CookieSettings,
    },
    CustomHeader {
        name: HeaderName,
    },
}

impl AffinityCarrier {
    /// Resolve a carrier by policy name (default `Cookie`).
    pub fn resolve(
        policy: Option<&str>,
        key_name: Option<&str>,
        cookie: &CookieConfig,
    ) -> Result<Self, String> {
        match policy.unwrap_or("Cookie") {
            "Cookie" => {
                let name = key_name.unwrap_or(DEFAULT_COOKIE_NAME);
                if name.is_empty() || !name.chars().all(is_cookie_name_char) {
                    return Err(format!("invalid affinity cookie name {:?}", name));
                }
                Ok(Self::Cookie {
                    name: name.to_string(),
                    settings: CookieSettings::from_config(cookie)?,
                })
            }
            "CustomHeader" => {
                let name = key_name.unwrap_or(DEFAULT_HEADER_NAME);
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| format!("invalid affinity header name {:?}", name))?;
                Ok(Self::CustomHeader { name })
            }
            other => Err(format!("unknown session affinity policy {:?}", other)),
        }
    }

    /// Carrier policy name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cookie { .. } => "Cookie",
            Self::CustomHeader { .. } => "CustomHeader",
        }
    }

    /// Read the raw key from request headers. Empty values count as absent.
    pub fn read(&self, headers: &HeaderMap) -> Option<String> {
        let value = match self {
            Self::Cookie { name, .. } => headers
                .get_all(COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(';'))
                .filter_map(|pair| pair.trim().split_once('='))
                .find(|(k, _)| *k == name.as_str())
                .map(|(_, v)| v.trim_matches('"').to_string()),
            Self::CustomHeader { name } => headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Write the key onto response headers.
    pub fn write(&self, headers: &mut HeaderMap, key: &str) -> Result<(), String> {
        match self {
            Self::Cookie { name, settings } => {
                let value = HeaderValue::from_str(&settings.render(name, key))
                    .map_err(|e| e.to_string())?;
                headers.append(SET_COOKIE, value);
            }
            Self::CustomHeader { name } => {
                let value = HeaderValue::from_str(key).map_err(|e| e.to_string())?;
                headers.insert(name.clone(), value);
            }
        }
        Ok(())
    }
}

fn is_cookie_name_char(c: char) -> bool {
    c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?={}".contains(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_read_and_write() {
        let carrier = AffinityCarrier::resolve(None, Some("aff"), &CookieConfig::default()).unwrap();
        let mut request = HeaderMap::new();
        request.insert(COOKIE, "theme=dark; aff=abc123; other=1".parse().unwrap());
        assert_eq!(carrier.read(&request).as_deref(), Some("abc123"));

        let mut response = HeaderMap::new();
        carrier.write(&mut response, "xyz").unwrap();
        assert_eq!(response[SET_COOKIE], "aff=xyz; Path=/; HttpOnly");
    }

    #[test]
    fn test_cookie_attributes() {
        let config = CookieConfig {
            path: Some("/app".into()),
            domain: Some("example.com".into()),
            http_only: false,
            secure: true,
            same_site: Some("strict".into()),
            max_age_secs: Some(3600),
        };
        let carrier = AffinityCarrier::resolve(Some("Cookie"), None, &config).unwrap();
        let mut response = HeaderMap::new();
        carrier.write(&mut response, "k").unwrap();
        assert_eq!(
            response[SET_COOKIE],
            ".Proxy.Affinity=k; Path=/app; Domain=example.com; Max-Age=3600; Secure; SameSite=Strict"
        );
    }

    #[test]
    fn test_header_carrier() {
        let carrier =
            AffinityCarrier::resolve(Some("CustomHeader"), Some("X-MyAffinity"), &CookieConfig::default())
                .unwrap();
        let mut headers = HeaderMap::new();
        assert!(carrier.read(&headers).is_none());
        headers.insert("x-myaffinity", "".parse().unwrap());
        assert!(carrier.read(&headers).is_none());
        carrier.write(&mut headers, "key").unwrap();
        assert_eq!(carrier.read(&headers).as_deref(), Some("key"));
    }

    #[test]
    fn test_rejects_unknown_policy() {
        assert!(AffinityCarrier::resolve(Some("Url"), None, &CookieConfig::default()).is_err());
        assert!(AffinityCarrier::resolve(None, Some("a b"), &CookieConfig::default()).is_err());
        let bad_same_site = CookieConfig {
            same_site: Some("Sometimes".into()),
            ..CookieConfig::default()
        };
        assert!(AffinityCarrier::resolve(None, None, &bad_same_site).is_err());
    }
}
