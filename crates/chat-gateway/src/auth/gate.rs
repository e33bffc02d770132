//! Admin session gate.
//!
//! Admin access is decided by a fixed, ordered list of strategies. The first
//! strategy to grant wins. If none grants, the outcome distinguishes "no
//! credential" (401) from "credential present but not privileged" (403).

use std::collections::HashSet;

use serde::Serialize;

use crate::auth::{Credentials, DashboardAccount, DASHBOARD_ADMIN_NAME};
use crate::error::GatewayError;

/// How an admin authenticated. Serialized as the session check's `authType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthType {
    #[serde(rename = "google")]
    Federated,
    #[serde(rename = "password")]
    Password,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Federated => "google",
            Self::Password => "password",
        }
    }
}

/// An authorized admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity {
    pub email: String,
    pub name: String,
    pub auth_type: AuthType,
}

/// A single strategy's opinion about a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Granted(AdminIdentity),
    /// The strategy's credential was present but is not privileged.
    Rejected,
    /// The strategy's credential was not present.
    NoCredential,
}

pub trait AuthorizationStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, credentials: &Credentials) -> Verdict;
}

/// Federated identities whose email is on the admin allow-list.
///
/// An empty allow-list grants nobody.
pub struct FederatedAllowList {
    admin_emails: HashSet<String>,
}

impl FederatedAllowList {
    pub fn new<I: IntoIterator<Item = String>>(emails: I) -> Self {
        Self {
            admin_emails: emails.into_iter().map(|e| e.to_lowercase()).collect(),
        }
    }
}

impl AuthorizationStrategy for FederatedAllowList {
    fn name(&self) -> &'static str {
        "federated_allow_list"
    }

    fn check(&self, credentials: &Credentials) -> Verdict {
        let Some(identity) = &credentials.federated else {
            return Verdict::NoCredential;
        };
        if self.admin_emails.contains(&identity.email) {
            Verdict::Granted(AdminIdentity {
                email: identity.email.clone(),
                name: identity.name.clone().unwrap_or_else(|| "Admin".to_string()),
                auth_type: AuthType::Federated,
            })
        } else {
            Verdict::Rejected
        }
    }
}

/// A verified dashboard token naming the configured dashboard account.
pub struct DashboardToken {
    account: Option<DashboardAccount>,
}

impl DashboardToken {
    pub fn new(account: Option<DashboardAccount>) -> Self {
        Self { account }
    }
}

impl AuthorizationStrategy for DashboardToken {
    fn name(&self) -> &'static str {
        "dashboard_token"
    }

    fn check(&self, credentials: &Credentials) -> Verdict {
        let Some(claims) = &credentials.admin_token else {
            return Verdict::NoCredential;
        };
        match &self.account {
            Some(account) if account.matches_email(&claims.email) => {
                Verdict::Granted(AdminIdentity {
                    email: account.email().to_string(),
                    name: DASHBOARD_ADMIN_NAME.to_string(),
                    auth_type: AuthType::Password,
                })
            }
            _ => Verdict::Rejected,
        }
    }
}

/// Ordered set of strategies guarding the admin endpoints.
pub struct AdminGate {
    strategies: Vec<Box<dyn AuthorizationStrategy>>,
}

impl AdminGate {
    pub fn new(strategies: Vec<Box<dyn AuthorizationStrategy>>) -> Self {
        Self { strategies }
    }

    /// Federated allow-list first, then the local dashboard token.
    pub fn standard(admin_emails: Vec<String>, dashboard: Option<DashboardAccount>) -> Self {
        Self::new(vec![
            Box::new(FederatedAllowList::new(admin_emails)),
            Box::new(DashboardToken::new(dashboard)),
        ])
    }

    pub fn authorize(&self, credentials: &Credentials) -> Result<AdminIdentity, GatewayError> {
        let mut rejected = false;
        for strategy in &self.strategies {
            match strategy.check(credentials) {
                Verdict::Granted(identity) => {
                    tracing::debug!(strategy = strategy.name(), email = %identity.email, "Admin access granted");
                    return Ok(identity);
                }
                Verdict::Rejected => {
                    tracing::debug!(strategy = strategy.name(), "Credential not privileged");
                    rejected = true;
                }
                Verdict::NoCredential => {}
            }
        }
        if rejected {
            Err(GatewayError::Authorization)
        } else {
            Err(GatewayError::Authentication("Unauthorized"))
        }
    }

    pub fn is_authorized(&self, credentials: &Credentials) -> bool {
        self.authorize(credentials).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::federated::FederatedIdentity;
    use crate::auth::token::TokenClaims;

    fn gate() -> AdminGate {
        AdminGate::standard(
            vec!["alice@example.com".to_string()],
            Some(DashboardAccount::new("ops@example.com", "pw")),
        )
    }

    fn federated(email: &str) -> Credentials {
        Credentials {
            federated: Some(FederatedIdentity {
                email: email.to_string(),
                name: None,
                image_url: None,
            }),
            admin_token: None,
        }
    }

    fn token(email: &str) -> Credentials {
        Credentials {
            federated: None,
            admin_token: Some(TokenClaims {
                email: email.to_string(),
                issued_at_ms: 0,
            }),
        }
    }

    #[test]
    fn test_allow_listed_federated_user_authorized() {
        let identity = gate().authorize(&federated("alice@example.com")).unwrap();
        assert_eq!(identity.auth_type, AuthType::Federated);
        assert_eq!(identity.name, "Admin");
    }

    #[test]
    fn test_federated_user_not_listed_is_forbidden() {
        let err = gate().authorize(&federated("mallory@example.com")).unwrap_err();
        assert!(matches!(err, GatewayError::Authorization));
    }

    #[test]
    fn test_no_credential_is_unauthenticated() {
        let err = gate().authorize(&Credentials::default()).unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(_)));
    }

    #[test]
    fn test_dashboard_token_authorized() {
        let identity = gate().authorize(&token("ops@example.com")).unwrap();
        assert_eq!(identity.auth_type, AuthType::Password);
        assert_eq!(identity.name, DASHBOARD_ADMIN_NAME);
    }

    #[test]
    fn test_token_for_replaced_account_is_forbidden() {
        let err = gate().authorize(&token("former@example.com")).unwrap_err();
        assert!(matches!(err, GatewayError::Authorization));
    }

    #[test]
    fn test_unlisted_federated_user_with_dashboard_token_authorized() {
        let mut creds = federated("mallory@example.com");
        creds.admin_token = token("ops@example.com").admin_token;
        assert!(gate().is_authorized(&creds));
    }

    #[test]
    fn test_empty_allow_list_grants_nobody() {
        let gate = AdminGate::standard(Vec::new(), None);
        assert!(!gate.is_authorized(&federated("alice@example.com")));
    }

    #[test]
    fn test_auth_type_wire_names() {
        assert_eq!(serde_json::to_string(&AuthType::Federated).unwrap(), "\"google\"");
        assert_eq!(serde_json::to_string(&AuthType::Password).unwrap(), "\"password\"");
    }
}
