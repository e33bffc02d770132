//! Admin endpoints: dashboard login/logout, session check, and the gated
//! pass-throughs to the backend's admin API.

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::CookieJar;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::Instrument;

use super::chat::json_response;
use super::finish;
use crate::auth::cookies::{admin_cookie, clear_admin_cookie};
use crate::auth::gate::{AdminIdentity, AuthType};
use crate::auth::DASHBOARD_ADMIN_NAME;
use crate::error::GatewayError;
use crate::proxy::correlation;
use crate::proxy::upstream::{UpstreamClient, UpstreamOutcome, UpstreamRequest};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
pub struct AdminUser {
    email: String,
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_type: Option<AuthType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<AdminUser>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    range: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationsQuery {
    range: Option<String>,
    page: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    limit: Option<String>,
}

/// `POST /api/admin/login`
pub async fn login(State(state): State<Arc<AppState>>, jar: CookieJar, body: Bytes) -> Response {
    let request_id = correlation::generate_id();
    let span = gateway_tracing::admin_request_span!(request_id, "/api/admin/login");

    let response = async {
        let Ok(login) = serde_json::from_slice::<LoginRequest>(&body) else {
            return GatewayError::ClientInput("Email and password required").into_response();
        };
        if login.email.trim().is_empty() || login.password.is_empty() {
            return GatewayError::ClientInput("Email and password required").into_response();
        }

        let session = match (state.resolver.dashboard(), state.resolver.signer()) {
            (Some(account), Some(signer)) if account.verify_login(&login.email, &login.password) => {
                Some((account.email().to_string(), signer))
            }
            _ => None,
        };
        let Some((email, signer)) = session else {
            tracing::warn!("Dashboard login rejected");
            return GatewayError::Authentication("Invalid credentials").into_response();
        };

        let cookie = admin_cookie(
            signer.issue(&email),
            signer.ttl(),
            state.config.server.production,
        );
        tracing::Span::current().record("auth_type", AuthType::Password.as_str());
        tracing::info!(email = %email, "Dashboard login succeeded");

        let body = json!({
            "success": true,
            "user": { "email": email, "name": DASHBOARD_ADMIN_NAME },
        });
        (jar.add(cookie), Json(body)).into_response()
    }
    .instrument(span.clone())
    .await;

    span.record("status", response.status().as_u16());
    finish(response, &request_id, HeaderMap::new())
}

/// `DELETE /api/admin/login`
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let request_id = correlation::generate_id();
    let span = gateway_tracing::admin_request_span!(request_id, "/api/admin/login");
    let cookie = clear_admin_cookie(state.config.server.production);
    tracing::info!(parent: &span, "Dashboard logout");
    span.record("status", 200_u16);
    finish(
        (jar.add(cookie), Json(json!({ "success": true }))).into_response(),
        &request_id,
        HeaderMap::new(),
    )
}

/// `GET /api/admin/session`
pub async fn session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    let request_id = correlation::generate_id();
    let span = gateway_tracing::admin_request_span!(request_id, "/api/admin/session");

    let credentials = state.resolver.credentials(&headers, &jar);
    let status = match state.gate.authorize(&credentials) {
        Ok(admin) => {
            span.record("auth_type", admin.auth_type.as_str());
            SessionStatus {
                authenticated: true,
                auth_type: Some(admin.auth_type),
                user: Some(AdminUser {
                    email: admin.email,
                    name: admin.name,
                }),
            }
        }
        Err(_) => SessionStatus {
            authenticated: false,
            auth_type: None,
            user: None,
        },
    };
    span.record("status", 200_u16);
    finish(Json(status).into_response(), &request_id, HeaderMap::new())
}

/// `GET /api/admin/stats`
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    let upstream = state.upstream.clone();
    gated(&state, "/api/admin/stats", &headers, &jar, |_, request_id| async move {
        let request = UpstreamRequest::get("/api/admin/stats", &request_id)
            .query("range", query.range.unwrap_or_else(|| "7d".to_string()));
        passthrough(&upstream, request).await
    })
    .await
}

/// `GET /api/admin/conversations`
pub async fn conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConversationsQuery>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    let upstream = state.upstream.clone();
    gated(&state, "/api/admin/conversations", &headers, &jar, |_, request_id| async move {
        let request = UpstreamRequest::get("/api/admin/conversations", &request_id)
            .query("range", query.range.unwrap_or_else(|| "7d".to_string()))
            .query("page", query.page.unwrap_or_else(|| "1".to_string()))
            .query("limit", query.limit.unwrap_or_else(|| "50".to_string()));
        passthrough(&upstream, request).await
    })
    .await
}

/// `GET /api/admin/conversations/{session_id}`
pub async fn conversation_detail(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    let upstream = state.upstream.clone();
    gated(&state, "/api/admin/conversations/{session_id}", &headers, &jar, |_, request_id| async move {
        let request =
            UpstreamRequest::get("/api/admin/conversations", &request_id).segment(&session_id);
        passthrough(&upstream, request).await
    })
    .await
}

/// `GET /api/admin/sync/events`
pub async fn sync_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    let upstream = state.upstream.clone();
    gated(&state, "/api/admin/sync/events", &headers, &jar, |_, request_id| async move {
        let request = UpstreamRequest::get("/api/admin/sync/events", &request_id)
            .query("limit", query.limit.unwrap_or_else(|| "50".to_string()));
        passthrough(&upstream, request).await
    })
    .await
}

/// `POST /api/admin/sync/run`
///
/// The sync is attributed to the authorized admin. Upstream failure bodies
/// are forwarded as-is since they describe why the sync was refused.
pub async fn sync_run(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    let upstream = state.upstream.clone();
    gated(&state, "/api/admin/sync/run", &headers, &jar, |admin, request_id| async move {
        let body = json!({ "triggeredBy": admin.email });
        let request = UpstreamRequest::post("/api/admin/sync/run", &request_id)
            .json(Bytes::from(body.to_string()));
        match upstream.exchange(request).await? {
            UpstreamOutcome::Success(response) => {
                let status = response.status();
                Ok(json_response(status, response.bytes().await?))
            }
            UpstreamOutcome::Challenge(challenge) => Ok(challenge.into_response()),
            UpstreamOutcome::Error { status, body } => {
                tracing::warn!(status = status.as_u16(), "Sync run refused by backend");
                let status = backend_status(status);
                let body = if serde_json::from_slice::<serde_json::Value>(&body).is_ok() {
                    body
                } else {
                    Bytes::from_static(b"{}")
                };
                Ok(json_response(status, body))
            }
        }
    })
    .await
}

/// `GET /api/admin/security`
pub async fn security(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    let upstream = state.upstream.clone();
    gated(&state, "/api/admin/security", &headers, &jar, |_, request_id| async move {
        passthrough(&upstream, UpstreamRequest::get("/api/admin/security", &request_id)).await
    })
    .await
}

/// Run `call` only for an authorized admin. 401/403 come from the gate,
/// never from the upstream.
async fn gated<F, Fut>(
    state: &AppState,
    route: &'static str,
    headers: &HeaderMap,
    jar: &CookieJar,
    call: F,
) -> Response
where
    F: FnOnce(AdminIdentity, String) -> Fut,
    Fut: Future<Output = Result<Response, GatewayError>>,
{
    let request_id = correlation::generate_id();
    let span = gateway_tracing::admin_request_span!(request_id, route);

    let result = async {
        let credentials = state.resolver.credentials(headers, jar);
        let admin = state.gate.authorize(&credentials)?;
        tracing::Span::current().record("auth_type", admin.auth_type.as_str());
        call(admin, request_id.clone()).await
    }
    .instrument(span.clone())
    .await;

    let response = result.unwrap_or_else(IntoResponse::into_response);
    span.record("status", response.status().as_u16());
    finish(response, &request_id, HeaderMap::new())
}

/// Forward a successful JSON body; any failure becomes the generic
/// backend error with the upstream's status.
async fn passthrough(
    upstream: &UpstreamClient,
    request: UpstreamRequest,
) -> Result<Response, GatewayError> {
    match upstream.exchange(request).await? {
        UpstreamOutcome::Success(response) => {
            let status = response.status();
            Ok(json_response(status, response.bytes().await?))
        }
        UpstreamOutcome::Challenge(challenge) => Err(GatewayError::UpstreamProtocol {
            status: backend_status(challenge.status()),
        }),
        UpstreamOutcome::Error { status, .. } => Err(GatewayError::UpstreamProtocol {
            status: backend_status(status),
        }),
    }
}

/// Status to show the admin for an upstream failure. An upstream 401/403
/// means the backend refused the gateway itself, so it becomes 502.
fn backend_status(status: StatusCode) -> StatusCode {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        StatusCode::BAD_GATEWAY
    } else {
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_wire_shape() {
        let anonymous = SessionStatus {
            authenticated: false,
            auth_type: None,
            user: None,
        };
        assert_eq!(
            serde_json::to_value(&anonymous).unwrap(),
            json!({ "authenticated": false })
        );

        let admin = SessionStatus {
            authenticated: true,
            auth_type: Some(AuthType::Password),
            user: Some(AdminUser {
                email: "ops@example.com".to_string(),
                name: DASHBOARD_ADMIN_NAME.to_string(),
            }),
        };
        assert_eq!(
            serde_json::to_value(&admin).unwrap(),
            json!({
                "authenticated": true,
                "authType": "password",
                "user": { "email": "ops@example.com", "name": "Dashboard Admin" }
            })
        );
    }

    #[test]
    fn test_backend_auth_failures_become_bad_gateway() {
        assert_eq!(backend_status(StatusCode::UNAUTHORIZED), StatusCode::BAD_GATEWAY);
        assert_eq!(backend_status(StatusCode::FORBIDDEN), StatusCode::BAD_GATEWAY);
        assert_eq!(
            backend_status(StatusCode::SERVICE_UNAVAILABLE),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(backend_status(StatusCode::CONFLICT), StatusCode::CONFLICT);
    }

    #[test]
    fn test_login_body_fields_default_to_empty() {
        let login: LoginRequest = serde_json::from_str(r#"{"email":"a@b"}"#).unwrap();
        assert_eq!(login.email, "a@b");
        assert!(login.password.is_empty());
    }
}
