//! Configuration types and loading logic.

use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use gateway_tracing::TracingConfig;
use serde::Deserialize;

/// Minimum accepted length of the admin-token signing secret, in bytes.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

/// Top-level gateway configuration. Built once at startup and never mutated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Production deployments mark session cookies `Secure`.
    #[serde(default)]
    pub production: bool,
}

/// Upstream chat backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base address of the backend, e.g. `https://backend.internal:8080`.
    #[serde(default)]
    pub base_url: String,

    /// Shared secret sent as `X-Internal-Api-Key` on every upstream call.
    #[serde(default)]
    pub internal_api_key: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Budget for acquiring a connection slot, sending the request and
    /// receiving response headers.
    #[serde(default = "default_header_timeout")]
    pub header_timeout_secs: u64,

    /// Longest silence tolerated between two body chunks.
    #[serde(default = "default_idle_read_timeout")]
    pub idle_read_timeout_secs: u64,

    /// Upper bound on concurrent upstream requests. Further requests queue.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Chunks buffered between the upstream reader and the client writer.
    #[serde(default = "default_relay_buffer_chunks")]
    pub relay_buffer_chunks: usize,
}

/// Cross-origin policy for the embeddable chat widget.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Exact production origins. The first entry is the primary origin
    /// echoed back to callers that match nothing.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Hosting platforms whose subdomains embed the widget.
    #[serde(default = "default_platform_suffixes")]
    pub platform_suffixes: Vec<String>,

    /// Development preview hosts.
    #[serde(default = "default_preview_suffixes")]
    pub preview_suffixes: Vec<String>,

    #[serde(default = "default_cors_max_age")]
    pub max_age_secs: u64,
}

/// Caller authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Federated identities allowed into the admin endpoints (lower-cased).
    #[serde(default)]
    pub admin_emails: Vec<String>,

    #[serde(default)]
    pub dashboard_email: Option<String>,

    #[serde(default)]
    pub dashboard_password: Option<String>,

    /// HMAC key for admin session tokens.
    #[serde(default)]
    pub session_secret: Option<String>,

    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    #[serde(default)]
    pub federated: FederatedConfig,
}

/// Identity asserted by a fronting OAuth proxy through request headers.
#[derive(Debug, Clone, Deserialize)]
pub struct FederatedConfig {
    /// Only enable behind a proxy that strips these headers from client input.
    #[serde(default)]
    pub trust_forwarded_headers: bool,

    #[serde(default = "default_email_header")]
    pub email_header: String,

    #[serde(default = "default_name_header")]
    pub name_header: String,

    #[serde(default = "default_image_header")]
    pub image_header: String,
}

/// Startup configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("upstream base URL is not configured (set BACKEND_URL)")]
    MissingUpstreamUrl,

    #[error("upstream base URL {url:?} is invalid: {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },

    #[error("internal API key is not configured (set INTERNAL_API_KEY)")]
    MissingInternalApiKey,

    #[error("upstream.max_connections must be at least 1")]
    ZeroConnections,

    #[error("upstream.relay_buffer_chunks must be at least 1")]
    ZeroRelayBuffer,

    #[error("cors.allowed_origins must contain at least the primary origin")]
    NoAllowedOrigins,

    #[error("DASHBOARD_EMAIL and DASHBOARD_PASSWORD must be set together")]
    IncompleteDashboardAccount,

    #[error("a dashboard account requires SESSION_SECRET of at least {} bytes", MIN_SESSION_SECRET_LEN)]
    WeakSessionSecret,
}

fn default_listen_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_header_timeout() -> u64 {
    60
}

fn default_idle_read_timeout() -> u64 {
    120
}

fn default_max_connections() -> usize {
    256
}

fn default_relay_buffer_chunks() -> usize {
    32
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "https://jove.sam9scloud.in".to_string(),
        "https://joveheal.com".to_string(),
        "https://www.joveheal.com".to_string(),
    ]
}

fn default_platform_suffixes() -> Vec<String> {
    vec![".kajabi.com".to_string(), ".mykajabi.com".to_string()]
}

fn default_preview_suffixes() -> Vec<String> {
    vec![".replit.dev".to_string(), ".replit.app".to_string()]
}

fn default_cors_max_age() -> u64 {
    86_400
}

fn default_token_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_email_header() -> String {
    "x-auth-request-email".to_string()
}

fn default_name_header() -> String {
    "x-auth-request-user".to_string()
}

fn default_image_header() -> String {
    "x-auth-request-picture".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            production: false,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            internal_api_key: String::new(),
            connect_timeout_secs: default_connect_timeout(),
            header_timeout_secs: default_header_timeout(),
            idle_read_timeout_secs: default_idle_read_timeout(),
            max_connections: default_max_connections(),
            relay_buffer_chunks: default_relay_buffer_chunks(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            platform_suffixes: default_platform_suffixes(),
            preview_suffixes: default_preview_suffixes(),
            max_age_secs: default_cors_max_age(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_emails: Vec::new(),
            dashboard_email: None,
            dashboard_password: None,
            session_secret: None,
            token_ttl_secs: default_token_ttl(),
            federated: FederatedConfig::default(),
        }
    }
}

impl Default for FederatedConfig {
    fn default() -> Self {
        Self {
            trust_forwarded_headers: false,
            email_header: default_email_header(),
            name_header: default_name_header(),
            image_header: default_image_header(),
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn header_timeout(&self) -> Duration {
        Duration::from_secs(self.header_timeout_secs)
    }

    pub fn idle_read_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_read_timeout_secs)
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file and environment variables, then
    /// validate it.
    ///
    /// Priority (highest to lowest):
    /// 1. Flat deployment variables (`BACKEND_URL`, `INTERNAL_API_KEY`, ...)
    /// 2. Environment variables (GATEWAY_ prefix, __ for nesting)
    /// 3. TOML config file
    /// 4. Defaults
    pub fn load(config_path: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("GATEWAY_").split("__"));

        let mut config: GatewayConfig = figment.extract().map_err(Box::new)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Apply the flat deployment variables on top of the layered config.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("BACKEND_URL") {
            self.upstream.base_url = url;
        }
        if let Some(key) = lookup("INTERNAL_API_KEY") {
            self.upstream.internal_api_key = key;
        }
        if let Some(list) = lookup("ADMIN_EMAILS") {
            self.auth.admin_emails = list.split(',').map(str::to_string).collect();
        }
        if let Some(email) = lookup("DASHBOARD_EMAIL") {
            self.auth.dashboard_email = Some(email);
        }
        if let Some(password) = lookup("DASHBOARD_PASSWORD") {
            self.auth.dashboard_password = Some(password);
        }
        if let Some(secret) = lookup("SESSION_SECRET") {
            self.auth.session_secret = Some(secret);
        }
    }

    /// Canonicalize values that are compared case-insensitively or may carry
    /// stray whitespace from the environment.
    pub fn normalize(&mut self) {
        self.upstream.base_url = self.upstream.base_url.trim().to_string();
        self.auth.admin_emails = self
            .auth
            .admin_emails
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self.auth.dashboard_email = self
            .auth
            .dashboard_email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());
        self.auth.dashboard_password = self
            .auth
            .dashboard_password
            .take()
            .filter(|p| !p.is_empty());
    }

    /// Reject configurations the gateway cannot safely serve with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.base_url.is_empty() {
            return Err(ConfigError::MissingUpstreamUrl);
        }
        let url = reqwest::Url::parse(&self.upstream.base_url).map_err(|e| {
            ConfigError::InvalidUpstreamUrl {
                url: self.upstream.base_url.clone(),
                reason: e.to_string(),
            }
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUpstreamUrl {
                url: self.upstream.base_url.clone(),
                reason: "expected an absolute http(s) URL".to_string(),
            });
        }
        if self.upstream.internal_api_key.is_empty() {
            return Err(ConfigError::MissingInternalApiKey);
        }
        if self.upstream.max_connections == 0 {
            return Err(ConfigError::ZeroConnections);
        }
        if self.upstream.relay_buffer_chunks == 0 {
            return Err(ConfigError::ZeroRelayBuffer);
        }
        if self.cors.allowed_origins.is_empty() {
            return Err(ConfigError::NoAllowedOrigins);
        }

        match (&self.auth.dashboard_email, &self.auth.dashboard_password) {
            (Some(_), Some(_)) => {
                let strong = self
                    .auth
                    .session_secret
                    .as_deref()
                    .is_some_and(|s| s.len() >= MIN_SESSION_SECRET_LEN);
                if !strong {
                    return Err(ConfigError::WeakSessionSecret);
                }
            }
            (None, None) => {}
            _ => return Err(ConfigError::IncompleteDashboardAccount),
        }

        Ok(())
    }
}
