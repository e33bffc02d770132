//! Client for the upstream chat backend.
//!
//! One pooled `reqwest::Client` per process. A semaphore bounds the number of
//! in-flight upstream requests; callers beyond the bound queue for a permit.
//! The permit travels with the response and is released only when the caller
//! is done reading it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use reqwest::Url;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::Instrument;

use super::challenge::ChallengeResponse;
use super::correlation::REQUEST_ID_HEADER;
use crate::config::UpstreamConfig;
use crate::error::GatewayError;

/// Header carrying the shared secret that marks gateway-originated traffic.
pub const INTERNAL_API_KEY_HEADER: &str = "x-internal-api-key";

#[derive(Debug, thiserror::Error)]
pub enum ClientSetupError {
    #[error("invalid upstream base URL '{url}': {reason}")]
    BaseUrl { url: String, reason: String },

    #[error("internal API key is not a valid header value")]
    ApiKey,

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// One request to the upstream, built by the route handlers.
#[derive(Debug)]
pub struct UpstreamRequest {
    method: Method,
    segments: Vec<String>,
    query: Vec<(&'static str, String)>,
    body: Option<Bytes>,
    request_id: String,
    forwarded_for: Option<String>,
}

impl UpstreamRequest {
    pub fn new(method: Method, path: &str, request_id: &str) -> Self {
        Self {
            method,
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            query: Vec::new(),
            body: None,
            request_id: request_id.to_string(),
            forwarded_for: None,
        }
    }

    pub fn get(path: &str, request_id: &str) -> Self {
        Self::new(Method::GET, path, request_id)
    }

    pub fn post(path: &str, request_id: &str) -> Self {
        Self::new(Method::POST, path, request_id)
    }

    /// Append one path segment. Reserved characters are percent-encoded.
    pub fn segment(mut self, segment: &str) -> Self {
        self.segments.push(segment.to_string());
        self
    }

    pub fn query(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.query.push((key, value.into()));
        self
    }

    pub fn json(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn forwarded_for(mut self, chain: Option<String>) -> Self {
        self.forwarded_for = chain;
        self
    }
}

/// Shared, cheaply clonable upstream client.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: HeaderValue,
    permits: Arc<Semaphore>,
    header_timeout: Duration,
    body_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, ClientSetupError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| ClientSetupError::BaseUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClientSetupError::BaseUrl {
                url: config.base_url.clone(),
                reason: "not a base URL".to_string(),
            });
        }
        let mut api_key =
            HeaderValue::from_str(&config.internal_api_key).map_err(|_| ClientSetupError::ApiKey)?;
        api_key.set_sensitive(true);

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.max_connections)
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key,
            permits: Arc::new(Semaphore::new(config.max_connections)),
            header_timeout: config.header_timeout(),
            body_timeout: config.idle_read_timeout(),
        })
    }

    /// Permits currently free. Exposed for tests and health reporting.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    fn url_for(&self, request: &UpstreamRequest) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::UpstreamUnavailable("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(&request.segments);
        if !request.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(request.query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// Send a request and wait for the response headers.
    ///
    /// Waiting for a permit, connecting and receiving headers all count
    /// against the header timeout. Any failure in that window is
    /// `UpstreamUnavailable`.
    pub async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, GatewayError> {
        let url = self.url_for(&request)?;
        let span = gateway_tracing::upstream_call_span!(&request.request_id, url.path());
        let started = Instant::now();

        let mut builder = self
            .http
            .request(request.method, url)
            .header(INTERNAL_API_KEY_HEADER, self.api_key.clone())
            .header(REQUEST_ID_HEADER, request.request_id.as_str());
        if let Some(chain) = &request.forwarded_for {
            builder = builder.header("x-forwarded-for", chain.as_str());
        }
        if let Some(body) = request.body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let permits = Arc::clone(&self.permits);
        let attempt = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| GatewayError::UpstreamUnavailable("connection pool closed".into()))?;
            let response = builder
                .send()
                .await
                .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
            Ok::<_, GatewayError>((permit, response))
        };

        let result = tokio::time::timeout(self.header_timeout, attempt)
            .instrument(span.clone())
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;
        span.record("latency_ms", latency_ms);

        match result {
            Ok(Ok((permit, response))) => {
                let status = response.status();
                span.record("status", status.as_u16());
                tracing::debug!(parent: &span, status = status.as_u16(), latency_ms, "Upstream headers received");
                Ok(UpstreamResponse {
                    response,
                    permit,
                    started,
                    body_timeout: self.body_timeout,
                })
            }
            Ok(Err(e)) => {
                tracing::warn!(parent: &span, error = %e, latency_ms, "Upstream request failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(parent: &span, latency_ms, "Upstream response headers timed out");
                Err(GatewayError::UpstreamUnavailable(format!(
                    "no response headers within {}s",
                    self.header_timeout.as_secs()
                )))
            }
        }
    }

    /// Send and classify in one step.
    pub async fn exchange(&self, request: UpstreamRequest) -> Result<UpstreamOutcome, GatewayError> {
        self.send(request).await?.classify().await
    }
}

/// An upstream response whose headers have arrived. Holds its connection
/// permit until dropped.
#[derive(Debug)]
pub struct UpstreamResponse {
    response: reqwest::Response,
    permit: OwnedSemaphorePermit,
    started: Instant,
    body_timeout: Duration,
}

/// What the upstream said, normalized for every route handler.
#[derive(Debug)]
pub enum UpstreamOutcome {
    /// 2xx. The body has not been read yet.
    Success(UpstreamResponse),
    /// A rate-limit or CAPTCHA challenge to surface unchanged.
    Challenge(ChallengeResponse),
    /// Any other non-2xx, with whatever body the upstream sent.
    Error { status: StatusCode, body: Bytes },
}

impl UpstreamResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// When the request was handed to the client, before queueing.
    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn into_parts(self) -> (reqwest::Response, OwnedSemaphorePermit) {
        (self.response, self.permit)
    }

    /// Read the whole body within the body timeout.
    pub async fn bytes(self) -> Result<Bytes, GatewayError> {
        let Self {
            response,
            permit,
            body_timeout,
            ..
        } = self;
        let result = tokio::time::timeout(body_timeout, response.bytes()).await;
        drop(permit);
        match result {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(GatewayError::UpstreamUnavailable(e.to_string())),
            Err(_) => Err(GatewayError::UpstreamUnavailable(format!(
                "body not received within {}s",
                body_timeout.as_secs()
            ))),
        }
    }

    /// Sort the response into success, challenge or error. Non-success
    /// bodies are read so challenges can be recognized.
    pub async fn classify(self) -> Result<UpstreamOutcome, GatewayError> {
        let status = self.status();
        if status.is_success() {
            return Ok(UpstreamOutcome::Success(self));
        }
        let body = self.bytes().await?;
        Ok(match ChallengeResponse::from_upstream(status, &body) {
            Some(challenge) => UpstreamOutcome::Challenge(challenge),
            None => UpstreamOutcome::Error { status, body },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> UpstreamClient {
        UpstreamClient::new(&UpstreamConfig {
            base_url: base_url.to_string(),
            internal_api_key: "k".to_string(),
            max_connections: 4,
            ..UpstreamConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_url_joins_segments_and_query() {
        let c = client("http://backend.internal:8080");
        let req = UpstreamRequest::get("/api/admin/conversations", "id")
            .query("range", "30d")
            .query("page", "2");
        assert_eq!(
            c.url_for(&req).unwrap().as_str(),
            "http://backend.internal:8080/api/admin/conversations?range=30d&page=2"
        );
    }

    #[test]
    fn test_url_keeps_base_prefix() {
        let c = client("https://example.com/backend/");
        let req = UpstreamRequest::post("/api/chat/stream", "id");
        assert_eq!(
            c.url_for(&req).unwrap().as_str(),
            "https://example.com/backend/api/chat/stream"
        );
    }

    #[test]
    fn test_segment_is_percent_encoded() {
        let c = client("http://backend");
        let req = UpstreamRequest::get("/api/admin/conversations", "id").segment("a/b?c");
        assert_eq!(
            c.url_for(&req).unwrap().as_str(),
            "http://backend/api/admin/conversations/a%2Fb%3Fc"
        );
    }

    #[test]
    fn test_invalid_setup_rejected() {
        let mut config = UpstreamConfig {
            base_url: "not a url".to_string(),
            ..UpstreamConfig::default()
        };
        assert!(matches!(
            UpstreamClient::new(&config),
            Err(ClientSetupError::BaseUrl { .. })
        ));

        config.base_url = "http://backend".to_string();
        config.internal_api_key = "bad\nkey".to_string();
        assert!(matches!(
            UpstreamClient::new(&config),
            Err(ClientSetupError::ApiKey)
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let c = client(&format!("http://{addr}"));
        let err = c
            .send(UpstreamRequest::post("/api/chat/stream", "id").json(Bytes::from_static(b"{}")))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable(_)));
        assert_eq!(c.available_permits(), 4);
    }
}
