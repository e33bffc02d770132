//! Caller authentication: credential extraction, principal resolution and the
//! admin gate.

pub mod cookies;
pub mod federated;
pub mod gate;
pub mod token;

use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use serde::Serialize;

use crate::auth::federated::{FederatedIdentity, ForwardedIdentity};
use crate::auth::token::{AdminTokenSigner, TokenClaims};

/// Display name given to the local dashboard account.
pub const DASHBOARD_ADMIN_NAME: &str = "Dashboard Admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    Guest,
    FederatedUser,
    PasswordAdmin,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::FederatedUser => "federated_user",
            Self::PasswordAdmin => "password_admin",
        }
    }
}

/// The normalized caller identity for one request. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub kind: PrincipalKind,
    pub email: Option<String>,
    pub name: Option<String>,
    pub image_url: Option<String>,
}

/// Identity forwarded to the upstream as `verified_user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedUser {
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
}

impl Principal {
    pub fn guest() -> Self {
        Self {
            kind: PrincipalKind::Guest,
            email: None,
            name: None,
            image_url: None,
        }
    }

    pub fn federated(identity: &FederatedIdentity) -> Self {
        Self {
            kind: PrincipalKind::FederatedUser,
            email: Some(identity.email.clone()),
            name: identity.name.clone(),
            image_url: identity.image_url.clone(),
        }
    }

    pub fn password_admin(email: &str) -> Self {
        Self {
            kind: PrincipalKind::PasswordAdmin,
            email: Some(email.to_lowercase()),
            name: Some(DASHBOARD_ADMIN_NAME.to_string()),
            image_url: None,
        }
    }

    /// The gateway-verified identity, or `None` for guests.
    pub fn verified_user(&self) -> Option<VerifiedUser> {
        match self.kind {
            PrincipalKind::Guest => None,
            PrincipalKind::FederatedUser | PrincipalKind::PasswordAdmin => {
                self.email.as_ref().map(|email| VerifiedUser {
                    email: email.clone(),
                    name: self.name.clone(),
                    image: self.image_url.clone(),
                })
            }
        }
    }
}

/// Every credential a request carried, already verified.
///
/// A token that fails to decode, verify or is expired is recorded as absent.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub federated: Option<FederatedIdentity>,
    pub admin_token: Option<TokenClaims>,
}

/// The single local dashboard account.
#[derive(Clone)]
pub struct DashboardAccount {
    email: String,
    password: String,
}

impl std::fmt::Debug for DashboardAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardAccount")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl DashboardAccount {
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.trim().to_lowercase(),
            password: password.to_string(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn matches_email(&self, email: &str) -> bool {
        self.email == email.trim().to_lowercase()
    }

    /// Both halves are always compared so timing does not reveal which failed.
    pub fn verify_login(&self, email: &str, password: &str) -> bool {
        let email_ok = self.matches_email(email);
        let password_ok = constant_time_eq(password, &self.password);
        email_ok & password_ok
    }
}

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Determines who is calling from request headers and cookies.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    federated: ForwardedIdentity,
    signer: Option<AdminTokenSigner>,
    dashboard: Option<DashboardAccount>,
}

impl CredentialResolver {
    pub fn new(
        federated: ForwardedIdentity,
        signer: Option<AdminTokenSigner>,
        dashboard: Option<DashboardAccount>,
    ) -> Self {
        Self {
            federated,
            signer,
            dashboard,
        }
    }

    pub fn signer(&self) -> Option<&AdminTokenSigner> {
        self.signer.as_ref()
    }

    pub fn dashboard(&self) -> Option<&DashboardAccount> {
        self.dashboard.as_ref()
    }

    /// Collect and verify the credentials a request carries.
    pub fn credentials(&self, headers: &HeaderMap, jar: &CookieJar) -> Credentials {
        let admin_token = match (&self.signer, jar.get(cookies::ADMIN_COOKIE)) {
            (Some(signer), Some(cookie)) => match signer.verify(cookie.value()) {
                Ok(claims) => Some(claims),
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring invalid admin token");
                    None
                }
            },
            _ => None,
        };
        Credentials {
            federated: self.federated.identity(headers),
            admin_token,
        }
    }

    /// Resolve exactly one principal, in priority order: federated identity,
    /// then a dashboard token for the configured account, then guest.
    pub fn resolve(&self, credentials: &Credentials) -> Principal {
        if let Some(identity) = &credentials.federated {
            return Principal::federated(identity);
        }
        if let (Some(claims), Some(dashboard)) = (&credentials.admin_token, &self.dashboard) {
            if dashboard.matches_email(&claims.email) {
                return Principal::password_admin(&claims.email);
            }
        }
        Principal::guest()
    }

    pub fn principal(&self, headers: &HeaderMap, jar: &CookieJar) -> Principal {
        self.resolve(&self.credentials(headers, jar))
    }
}
