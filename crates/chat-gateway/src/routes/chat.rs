//! Chat endpoints: the streaming widget endpoint, the non-streaming fallback,
//! the messaging-channel webhook and the persona stream.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::CookieJar;
use bytes::Bytes;
use serde_json::json;
use tracing::Instrument;

use super::{finish, PeerAddr};
use crate::cors::request_origin;
use crate::error::GatewayError;
use crate::proxy::compose::{compose_chat, compose_persona};
use crate::proxy::correlation;
use crate::proxy::relay::{event_stream_response, relay};
use crate::proxy::upstream::{UpstreamOutcome, UpstreamRequest};
use crate::server::AppState;

/// Fallback shown by the messaging channel when the backend answered badly.
const CHANNEL_BACKEND_ERROR: &str = "Sorry, I'm having trouble right now. Please try again.";

/// Fallback shown by the messaging channel when the backend was unreachable.
const CHANNEL_UNREACHABLE: &str = "I'm having trouble connecting. Please try again in a moment.";

/// `OPTIONS /api/chat/stream`
pub async fn chat_stream_preflight(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    state.origins.preflight(request_origin(&headers))
}

/// `POST /api/chat/stream`
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    PeerAddr(peer): PeerAddr,
    jar: CookieJar,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = correlation::generate_id();
    let span = gateway_tracing::chat_request_span!(request_id, "/api/chat/stream");
    let cors = state.origins.resolve(request_origin(&headers));

    let result = async {
        let principal = state.resolver.principal(&headers, &jar);
        tracing::Span::current().record("principal_kind", principal.kind.as_str());

        let payload = compose_chat(&body, &principal)?;
        let request = UpstreamRequest::post("/api/chat/stream", &request_id)
            .json(payload)
            .forwarded_for(correlation::forwarded_for(&headers, peer));
        stream_upstream(&state, request, &request_id).await
    }
    .instrument(span)
    .await;

    finish(result.unwrap_or_else(IntoResponse::into_response), &request_id, cors)
}

/// `POST /api/somera/stream`
pub async fn persona_stream(
    State(state): State<Arc<AppState>>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = correlation::generate_id();
    let span = gateway_tracing::chat_request_span!(request_id, "/api/somera/stream");

    let result = async {
        let payload = compose_persona(&body)?;
        let request = UpstreamRequest::post("/api/somera/stream", &request_id)
            .json(payload)
            .forwarded_for(correlation::forwarded_for(&headers, peer));
        stream_upstream(&state, request, &request_id).await
    }
    .instrument(span)
    .await;

    finish(
        result.unwrap_or_else(IntoResponse::into_response),
        &request_id,
        HeaderMap::new(),
    )
}

/// Send a streaming request and map the outcome. Must run inside the
/// request's span: the relay records onto `Span::current()`.
async fn stream_upstream(
    state: &AppState,
    request: UpstreamRequest,
    request_id: &str,
) -> Result<Response, GatewayError> {
    match state.upstream.exchange(request).await? {
        UpstreamOutcome::Success(response) => {
            let body = relay(
                response,
                state.relay_limits,
                state.stats.clone(),
                tracing::Span::current(),
            )
            .await?;
            Ok(event_stream_response(body, request_id))
        }
        UpstreamOutcome::Challenge(challenge) => Ok(challenge.into_response()),
        UpstreamOutcome::Error { status, .. } => Err(GatewayError::UpstreamProtocol { status }),
    }
}

/// `POST /api/chat`
///
/// Same identity handling as the stream, but the answer arrives as one JSON
/// document. Failures carry the apology text for direct display.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    PeerAddr(peer): PeerAddr,
    jar: CookieJar,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = correlation::generate_id();
    let span = gateway_tracing::chat_request_span!(request_id, "/api/chat");

    let result = async {
        let principal = state.resolver.principal(&headers, &jar);
        tracing::Span::current().record("principal_kind", principal.kind.as_str());

        let payload = compose_chat(&body, &principal)?;
        let request = UpstreamRequest::post("/api/chat", &request_id)
            .json(payload)
            .forwarded_for(correlation::forwarded_for(&headers, peer));
        match state.upstream.exchange(request).await? {
            UpstreamOutcome::Success(response) => {
                let status = response.status();
                Ok(json_response(status, response.bytes().await?))
            }
            UpstreamOutcome::Challenge(challenge) => Ok(challenge.into_response()),
            UpstreamOutcome::Error { status, .. } => {
                Err(GatewayError::UpstreamProtocol { status })
            }
        }
    }
    .instrument(span)
    .await;

    let response = result.unwrap_or_else(GatewayError::into_apology_response);
    finish(response, &request_id, HeaderMap::new())
}

/// `POST /api/chat/manychat`
///
/// The channel shows whatever it receives, so every failure becomes a 200
/// carrying a fallback message in the channel's v2 format.
pub async fn channel_webhook(
    State(state): State<Arc<AppState>>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = correlation::generate_id();
    let span = gateway_tracing::chat_request_span!(request_id, "/api/chat/manychat");

    let response = async {
        if serde_json::from_slice::<serde_json::Value>(&body).is_err() {
            tracing::warn!("Webhook body is not JSON");
            return channel_fallback(CHANNEL_UNREACHABLE);
        }
        let request = UpstreamRequest::post("/api/chat/manychat", &request_id)
            .json(body)
            .forwarded_for(correlation::forwarded_for(&headers, peer));

        match state.upstream.exchange(request).await {
            Ok(UpstreamOutcome::Success(response)) => match response.bytes().await {
                Ok(bytes) => json_response(StatusCode::OK, bytes),
                Err(e) => {
                    tracing::warn!(error = %e, "Webhook response body lost");
                    channel_fallback(CHANNEL_UNREACHABLE)
                }
            },
            Ok(UpstreamOutcome::Challenge(challenge)) => {
                tracing::warn!(status = challenge.status().as_u16(), "Webhook hit a challenge");
                channel_fallback(CHANNEL_BACKEND_ERROR)
            }
            Ok(UpstreamOutcome::Error { status, .. }) => {
                tracing::warn!(status = status.as_u16(), "Webhook backend returned failure status");
                channel_fallback(CHANNEL_BACKEND_ERROR)
            }
            Err(e) => {
                tracing::error!(error = %e, "Webhook backend unreachable");
                channel_fallback(CHANNEL_UNREACHABLE)
            }
        }
    }
    .instrument(span)
    .await;

    finish(response, &request_id, HeaderMap::new())
}

fn channel_fallback(text: &str) -> Response {
    Json(json!({
        "version": "v2",
        "content": {
            "messages": [{ "type": "text", "text": text }],
            "actions": [],
            "quick_replies": []
        }
    }))
    .into_response()
}

/// Forward an upstream JSON body as-is.
pub(crate) fn json_response(status: StatusCode, body: Bytes) -> Response {
    (
        status,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )],
        body,
    )
        .into_response()
}
