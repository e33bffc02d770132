//! Axum HTTP server: shared state, router, listener, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::auth::federated::ForwardedIdentity;
use crate::auth::gate::AdminGate;
use crate::auth::token::AdminTokenSigner;
use crate::auth::{CredentialResolver, DashboardAccount};
use crate::config::GatewayConfig;
use crate::cors::OriginPolicy;
use crate::proxy::relay::RelayLimits;
use crate::proxy::upstream::{ClientSetupError, UpstreamClient};
use crate::routes::{admin, chat};
use crate::stats::RelayStats;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Upstream(#[from] ClientSetupError),

    #[error("session secret cannot key the token signer")]
    SessionSecret,
}

/// Shared application state. Built once from the validated configuration.
pub struct AppState {
    pub config: GatewayConfig,
    pub upstream: UpstreamClient,
    pub origins: OriginPolicy,
    pub resolver: CredentialResolver,
    pub gate: AdminGate,
    pub stats: RelayStats,
    pub relay_limits: RelayLimits,
}

impl AppState {
    pub fn from_config(config: GatewayConfig) -> Result<Self, StartupError> {
        let upstream = UpstreamClient::new(&config.upstream)?;
        let auth = &config.auth;

        let dashboard = match (&auth.dashboard_email, &auth.dashboard_password) {
            (Some(email), Some(password)) => Some(DashboardAccount::new(email, password)),
            _ => None,
        };
        let signer = auth
            .session_secret
            .as_deref()
            .map(|secret| {
                AdminTokenSigner::new(secret.as_bytes(), Duration::from_secs(auth.token_ttl_secs))
            })
            .transpose()
            .map_err(|_| StartupError::SessionSecret)?;

        let resolver = CredentialResolver::new(
            ForwardedIdentity::new(&auth.federated),
            signer,
            dashboard.clone(),
        );
        let gate = AdminGate::standard(auth.admin_emails.clone(), dashboard);

        Ok(Self {
            origins: OriginPolicy::new(&config.cors),
            relay_limits: RelayLimits::from_config(&config.upstream),
            upstream,
            resolver,
            gate,
            stats: RelayStats::new(),
            config,
        })
    }
}

/// Build the router with all gateway routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/api/chat/stream",
            post(chat::chat_stream).options(chat::chat_stream_preflight),
        )
        .route("/api/chat", post(chat::chat))
        .route("/api/chat/manychat", post(chat::channel_webhook))
        .route("/api/somera/stream", post(chat::persona_stream))
        .route(
            "/api/admin/login",
            post(admin::login).delete(admin::logout),
        )
        .route("/api/admin/session", get(admin::session))
        .route("/api/admin/stats", get(admin::stats))
        .route("/api/admin/conversations", get(admin::conversations))
        .route(
            "/api/admin/conversations/{session_id}",
            get(admin::conversation_detail),
        )
        .route("/api/admin/sync/events", get(admin::sync_events))
        .route("/api/admin/sync/run", post(admin::sync_run))
        .route("/api/admin/security", get(admin::security))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build and run the HTTP server.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();
    let app = build_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Chat gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Chat gateway shut down gracefully");
    Ok(())
}

/// Health check endpoint with relay counters.
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "relay": state.stats.snapshot(),
        })),
    )
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
