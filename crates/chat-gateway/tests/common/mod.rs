//! Shared fixtures: a recording mock backend and gateway builders.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use axum_test::TestServer;
use bytes::Bytes;

use chat_gateway::config::GatewayConfig;
use chat_gateway::server::{build_router, AppState};

pub const INTERNAL_KEY: &str = "test-internal-key";
pub const DASHBOARD_EMAIL: &str = "ops@example.com";
pub const DASHBOARD_PASSWORD: &str = "correct horse battery staple";
pub const ADMIN_EMAIL: &str = "alice@example.com";
pub const PRIMARY_ORIGIN: &str = "https://jove.sam9scloud.in";

/// One request as the mock backend received it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("recorded body is JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub type RequestLog = Arc<Mutex<Vec<Recorded>>>;

/// A backend bound to an ephemeral local port.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub log: RequestLog,
}

impl MockUpstream {
    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().expect("request log").clone()
    }

    pub fn last(&self) -> Recorded {
        self.requests().pop().expect("backend saw a request")
    }
}

async fn record(State(log): State<RequestLog>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    log.lock().expect("request log").push(Recorded {
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers.clone(),
        body: bytes.clone(),
    });
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Serve `routes` as the backend, recording every matched request.
pub async fn spawn_upstream(routes: Router) -> MockUpstream {
    let log = RequestLog::default();
    let app = routes.layer(middleware::from_fn_with_state(log.clone(), record));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("mock upstream addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock upstream");
    });
    MockUpstream { addr, log }
}

/// An address nothing listens on.
pub fn refused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    addr
}

pub fn gateway_config(upstream: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.upstream.base_url = format!("http://{upstream}");
    config.upstream.internal_api_key = INTERNAL_KEY.to_string();
    config.upstream.header_timeout_secs = 5;
    config.upstream.idle_read_timeout_secs = 5;
    config.auth.admin_emails = vec![ADMIN_EMAIL.to_string()];
    config.auth.dashboard_email = Some(DASHBOARD_EMAIL.to_string());
    config.auth.dashboard_password = Some(DASHBOARD_PASSWORD.to_string());
    config.auth.session_secret = Some("s".repeat(48));
    config.auth.federated.trust_forwarded_headers = true;
    config.validate().expect("test config is valid");
    config
}

/// In-process gateway.
pub fn test_server(config: GatewayConfig) -> (TestServer, Arc<AppState>) {
    let state = Arc::new(AppState::from_config(config).expect("gateway state"));
    let server = TestServer::new(build_router(state.clone())).expect("create test server");
    (server, state)
}

/// Gateway on a real socket, with peer addresses available to handlers.
pub async fn spawn_gateway(config: GatewayConfig) -> (SocketAddr, Arc<AppState>) {
    let state = Arc::new(AppState::from_config(config).expect("gateway state"));
    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind gateway");
    let addr = listener.local_addr().expect("gateway addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("gateway");
    });
    (addr, state)
}

/// `Cookie` header carrying a freshly signed admin token for `email`.
pub fn admin_cookie(state: &AppState, email: &str) -> HeaderValue {
    let token = state.resolver.signer().expect("signer configured").issue(email);
    HeaderValue::from_str(&format!("admin_token={token}")).expect("cookie header")
}

pub fn federated_email() -> HeaderName {
    HeaderName::from_static("x-auth-request-email")
}

pub fn chat_body() -> serde_json::Value {
    serde_json::json!({
        "message": "hi",
        "session_id": "s1",
        "conversation_history": []
    })
}

/// Split an event-stream body into frames (text between blank lines).
pub fn split_frames(body: &str) -> Vec<&str> {
    body.split("\n\n").filter(|f| !f.trim().is_empty()).collect()
}
