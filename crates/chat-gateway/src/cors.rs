//! Origin policy for the embeddable chat widget.
//!
//! The allowed origin is always echoed explicitly, never `*`, since widget
//! requests may carry credentials. Unknown origins receive the primary
//! production origin, which browsers then refuse to match.

use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, VARY,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::config::CorsConfig;

/// Why an origin was accepted (or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginMatch {
    Exact,
    Platform,
    Preview,
    Fallback,
}

/// Deterministic, side-effect-free CORS decision.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed: Vec<String>,
    platform_suffixes: Vec<String>,
    preview_suffixes: Vec<String>,
    max_age: HeaderValue,
}

impl OriginPolicy {
    pub fn new(config: &CorsConfig) -> Self {
        let normalize = |suffixes: &[String]| -> Vec<String> {
            suffixes
                .iter()
                .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            allowed: config.allowed_origins.clone(),
            platform_suffixes: normalize(&config.platform_suffixes),
            preview_suffixes: normalize(&config.preview_suffixes),
            max_age: HeaderValue::from(config.max_age_secs),
        }
    }

    /// The origin echoed to callers that match no rule.
    pub fn primary_origin(&self) -> &str {
        self.allowed.first().map(String::as_str).unwrap_or_default()
    }

    /// Classify an `Origin` header value.
    pub fn classify(&self, origin: Option<&str>) -> OriginMatch {
        let Some(origin) = origin else {
            return OriginMatch::Fallback;
        };
        if self.allowed.iter().any(|a| a == origin) {
            return OriginMatch::Exact;
        }
        let Some(host) = https_host(origin) else {
            return OriginMatch::Fallback;
        };
        if matches_suffix(&host, &self.platform_suffixes) {
            OriginMatch::Platform
        } else if matches_suffix(&host, &self.preview_suffixes) {
            OriginMatch::Preview
        } else {
            OriginMatch::Fallback
        }
    }

    /// Compute the CORS response headers for a request's `Origin`.
    pub fn resolve(&self, origin: Option<&str>) -> HeaderMap {
        let matched = self.classify(origin);
        let echoed = match (matched, origin) {
            (OriginMatch::Fallback, _) | (_, None) => self.primary_origin(),
            (_, Some(origin)) => origin,
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("POST, OPTIONS"),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        );
        headers.insert(ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        headers.insert(VARY, HeaderValue::from_static("Origin"));
        if let Ok(value) = HeaderValue::from_str(echoed) {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        if matched != OriginMatch::Fallback {
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        headers
    }

    /// Response to an `OPTIONS` preflight: 204, CORS headers, no body.
    pub fn preflight(&self, origin: Option<&str>) -> Response {
        (StatusCode::NO_CONTENT, self.resolve(origin)).into_response()
    }
}

/// Read the `Origin` request header.
pub fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && *v != "null")
}

/// Extract the lower-cased host of an `https://host[:port]` origin.
fn https_host(origin: &str) -> Option<String> {
    let url = reqwest::Url::parse(origin).ok()?;
    if url.scheme() != "https" || url.path() != "/" || url.query().is_some() {
        return None;
    }
    url.host_str().map(str::to_ascii_lowercase)
}

/// `host` equals a suffix or is a subdomain of it.
fn matches_suffix(host: &str, suffixes: &[String]) -> bool {
    suffixes.iter().any(|suffix| {
        host == suffix
            || host
                .strip_suffix(suffix.as_str())
                .is_some_and(|rest| rest.ends_with('.'))
    })
}
