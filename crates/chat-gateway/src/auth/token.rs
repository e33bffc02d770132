//! Signed admin session tokens.
//!
//! Wire format: `b64url(email ":" issued_at_ms) "." b64url(hmac_sha256(payload))`.
//! Expiry is enforced here, independently of the cookie's `Max-Age`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Tolerated clock skew for tokens stamped slightly in the future.
const CLOCK_SKEW_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is not in payload.signature form")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token issued in the future")]
    NotYetValid,
}

/// Verified contents of an admin token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub email: String,
    pub issued_at_ms: u64,
}

/// Issues and verifies admin tokens with a server-held key.
#[derive(Clone)]
pub struct AdminTokenSigner {
    mac: HmacSha256,
    ttl: Duration,
}

impl std::fmt::Debug for AdminTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminTokenSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

pub fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl AdminTokenSigner {
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret)?,
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `email` stamped at `issued_at_ms`.
    pub fn issue_at(&self, email: &str, issued_at_ms: u64) -> String {
        let payload = format!("{email}:{issued_at_ms}");
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    pub fn issue(&self, email: &str) -> String {
        self.issue_at(email, unix_millis(SystemTime::now()))
    }

    /// Verify signature and age as of `now_ms`.
    pub fn verify_at(&self, token: &str, now_ms: u64) -> Result<TokenClaims, TokenError> {
        let (payload_b64, signature_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac.clone();
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload = String::from_utf8(payload).map_err(|_| TokenError::Malformed)?;
        let (email, issued_at) = payload.rsplit_once(':').ok_or(TokenError::Malformed)?;
        if email.is_empty() {
            return Err(TokenError::Malformed);
        }
        let issued_at_ms: u64 = issued_at.parse().map_err(|_| TokenError::Malformed)?;

        if issued_at_ms > now_ms.saturating_add(CLOCK_SKEW_MS) {
            return Err(TokenError::NotYetValid);
        }
        let ttl_ms = self.ttl.as_millis() as u64;
        if now_ms.saturating_sub(issued_at_ms) > ttl_ms {
            return Err(TokenError::Expired);
        }

        Ok(TokenClaims {
            email: email.to_lowercase(),
            issued_at_ms,
        })
    }

    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify_at(token, unix_millis(SystemTime::now()))
    }
}
