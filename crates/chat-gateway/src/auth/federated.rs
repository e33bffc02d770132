//! Federated identity asserted by a fronting OAuth proxy.

use axum::http::HeaderMap;

use crate::config::FederatedConfig;

/// An identity established by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    /// Always trimmed and lower-cased.
    pub email: String,
    pub name: Option<String>,
    pub image_url: Option<String>,
}

/// Reads the identity headers set by the OAuth proxy in front of the gateway.
///
/// Disabled unless the deployment explicitly trusts those headers: a client
/// talking to the gateway directly could otherwise assert any identity.
#[derive(Debug, Clone)]
pub struct ForwardedIdentity {
    enabled: bool,
    email_header: String,
    name_header: String,
    image_header: String,
}

impl ForwardedIdentity {
    pub fn new(config: &FederatedConfig) -> Self {
        Self {
            enabled: config.trust_forwarded_headers,
            email_header: config.email_header.to_ascii_lowercase(),
            name_header: config.name_header.to_ascii_lowercase(),
            image_header: config.image_header.to_ascii_lowercase(),
        }
    }

    pub fn identity(&self, headers: &HeaderMap) -> Option<FederatedIdentity> {
        if !self.enabled {
            return None;
        }
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let email = read(&self.email_header)?.to_lowercase();
        Some(FederatedIdentity {
            email,
            name: read(&self.name_header),
            image_url: read(&self.image_header),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn trusted() -> ForwardedIdentity {
        ForwardedIdentity::new(&FederatedConfig {
            trust_forwarded_headers: true,
            ..FederatedConfig::default()
        })
    }

    #[test]
    fn test_untrusted_headers_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-auth-request-email", HeaderValue::from_static("a@b.com"));
        let source = ForwardedIdentity::new(&FederatedConfig::default());
        assert_eq!(source.identity(&headers), None);
    }

    #[test]
    fn test_email_lowercased_and_optional_fields_read() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-auth-request-email",
            HeaderValue::from_static("  Alice@Example.COM "),
        );
        headers.insert("x-auth-request-user", HeaderValue::from_static("Alice"));
        let id = trusted().identity(&headers).unwrap();
        assert_eq!(id.email, "alice@example.com");
        assert_eq!(id.name.as_deref(), Some("Alice"));
        assert_eq!(id.image_url, None);
    }

    #[test]
    fn test_empty_email_means_no_session() {
        let mut headers = HeaderMap::new();
        headers.insert("x-auth-request-email", HeaderValue::from_static("   "));
        headers.insert("x-auth-request-user", HeaderValue::from_static("Alice"));
        assert_eq!(trusted().identity(&headers), None);
    }
}
