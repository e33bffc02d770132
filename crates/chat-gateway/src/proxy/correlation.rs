//! Request IDs and client-address forwarding.

use std::net::SocketAddr;

use axum::http::HeaderMap;
use uuid::Uuid;

/// The header carrying the per-request ID to the upstream and back to the client.
pub const REQUEST_ID_HEADER: &str = "x-gateway-request-id";

/// Generate a new request ID (UUID v4).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Build the `X-Forwarded-For` chain to send upstream: the inbound chain (if
/// any) followed by the directly connected peer.
pub fn forwarded_for(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let inbound = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    match (inbound, peer) {
        (Some(chain), Some(peer)) => Some(format!("{chain}, {}", peer.ip())),
        (Some(chain), None) => Some(chain.to_string()),
        (None, Some(peer)) => Some(peer.ip().to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(generate_id(), generate_id());
    }

    #[test]
    fn test_peer_appended_to_inbound_chain() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        let peer: SocketAddr = "10.0.0.2:51234".parse().unwrap();
        assert_eq!(
            forwarded_for(&headers, Some(peer)).as_deref(),
            Some("203.0.113.9, 10.0.0.2")
        );
    }

    #[test]
    fn test_peer_only() {
        let peer: SocketAddr = "198.51.100.4:443".parse().unwrap();
        assert_eq!(
            forwarded_for(&HeaderMap::new(), Some(peer)).as_deref(),
            Some("198.51.100.4")
        );
        assert_eq!(forwarded_for(&HeaderMap::new(), None), None);
    }
}
