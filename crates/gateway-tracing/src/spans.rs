//! Span builder helpers for chat-gateway instrumentation.

/// Create a tracing span for an inbound chat request (streaming or not).
///
/// Usage: `let span = chat_request_span!(request_id, "/api/chat/stream");`
///
/// Fields recorded later by the relay when the stream ends:
/// - `ttfb_ms`: milliseconds from upstream send to the first relayed chunk
/// - `total_duration_ms`: milliseconds from upstream send to stream end
/// - `bytes_relayed` / `frames_relayed`: volume forwarded to the client
/// - `outcome`: `completed`, `client_cancelled`, `idle_timeout` or `upstream_error`
#[macro_export]
macro_rules! chat_request_span {
    ($request_id:expr, $route:expr) => {
        tracing::info_span!(
            "chat_request",
            request_id = %$request_id,
            route = %$route,
            principal_kind = tracing::field::Empty,
            ttfb_ms = tracing::field::Empty,
            total_duration_ms = tracing::field::Empty,
            bytes_relayed = tracing::field::Empty,
            frames_relayed = tracing::field::Empty,
            outcome = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for one call to the upstream backend.
#[macro_export]
macro_rules! upstream_call_span {
    ($request_id:expr, $path:expr) => {
        tracing::info_span!(
            "upstream_call",
            request_id = %$request_id,
            path = %$path,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for an admin endpoint.
#[macro_export]
macro_rules! admin_request_span {
    ($request_id:expr, $route:expr) => {
        tracing::info_span!(
            "admin_request",
            request_id = %$request_id,
            route = %$route,
            auth_type = tracing::field::Empty,
            status = tracing::field::Empty,
        )
    };
}
