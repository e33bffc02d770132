//! Streaming relay from the upstream body to the client.
//!
//! Nothing is committed to the client until the upstream has produced its
//! first bytes. After that a producer task reads the upstream body and pushes
//! chunks into a bounded channel. The client response body is a `Stream` over the receiving end.
//! Dropping the client body cancels the producer, which drops the upstream
//! response and with it the upstream connection.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use super::correlation::REQUEST_ID_HEADER;
use super::sse::{FrameTracker, StreamEvent};
use super::upstream::UpstreamResponse;
use crate::config::UpstreamConfig;
use crate::error::{GatewayError, APOLOGY_MESSAGE};
use crate::stats::{RelayEnd, RelayStats};

/// Per-relay bounds.
#[derive(Debug, Clone, Copy)]
pub struct RelayLimits {
    /// Longest silence tolerated between two upstream chunks.
    pub idle_read_timeout: Duration,
    /// Chunks buffered between the upstream reader and the client writer.
    pub buffer_chunks: usize,
}

impl RelayLimits {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            idle_read_timeout: config.idle_read_timeout(),
            buffer_chunks: config.relay_buffer_chunks.max(1),
        }
    }
}

/// Why a relay stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed,
    ClientCancelled,
    IdleTimeout,
    UpstreamError(String),
}

impl RelayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::ClientCancelled => "client_cancelled",
            Self::IdleTimeout => "idle_timeout",
            Self::UpstreamError(_) => "upstream_error",
        }
    }

    fn stats_end(&self) -> RelayEnd {
        match self {
            Self::Completed => RelayEnd::Completed,
            Self::ClientCancelled => RelayEnd::ClientCancelled,
            Self::IdleTimeout | Self::UpstreamError(_) => RelayEnd::Failed,
        }
    }

    /// Whether the relay itself appends a final error frame.
    fn needs_error_frame(&self) -> bool {
        matches!(self, Self::IdleTimeout | Self::UpstreamError(_))
    }
}

/// What the producer forwarded before it stopped.
#[derive(Debug)]
pub struct RelaySummary {
    pub outcome: RelayOutcome,
    pub bytes: u64,
    pub frames: u64,
}

/// The client-facing response body.
///
/// Holds the cancellation guard: when hyper drops the body (client gone or
/// response finished), the producer is told to stop.
pub struct RelayBody {
    rx: mpsc::Receiver<Bytes>,
    _cancel_on_drop: DropGuard,
}

impl Stream for RelayBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Start relaying a successful upstream response.
///
/// Waits up to the idle timeout for the first non-empty chunk. A silent or
/// failing upstream at that point is `UpstreamUnavailable`, so the caller can
/// still answer with a plain error response.
///
/// `span` is the inbound request's span. The producer records the relay's
/// timing and volume on it when it stops, keeping it open until then.
pub async fn relay(
    upstream: UpstreamResponse,
    limits: RelayLimits,
    stats: RelayStats,
    span: tracing::Span,
) -> Result<RelayBody, GatewayError> {
    let started = upstream.started();
    let (response, permit) = upstream.into_parts();
    let mut body = Box::pin(response.bytes_stream());
    let first = first_chunk(&mut body, limits.idle_read_timeout).await?;
    let upstream = stream::iter(first.map(Ok)).chain(body);

    let (tx, rx) = mpsc::channel(limits.buffer_chunks);
    let cancel = CancellationToken::new();

    stats.stream_started();
    let producer_cancel = cancel.clone();
    let producer_span = span.clone();
    tokio::spawn(
        async move {
            let summary = pump(
                upstream,
                tx,
                producer_cancel,
                limits.idle_read_timeout,
                started,
                &span,
            )
            .await;
            drop(permit);

            span.record("total_duration_ms", started.elapsed().as_millis() as u64);
            span.record("bytes_relayed", summary.bytes);
            span.record("frames_relayed", summary.frames);
            span.record("outcome", summary.outcome.as_str());
            stats.stream_ended(summary.outcome.stats_end(), summary.bytes);

            match &summary.outcome {
                RelayOutcome::Completed => {
                    tracing::info!(bytes = summary.bytes, frames = summary.frames, "Relay complete");
                }
                RelayOutcome::ClientCancelled => {
                    tracing::info!(bytes = summary.bytes, "Client disconnected, upstream read aborted");
                }
                RelayOutcome::IdleTimeout => GatewayError::StreamInterrupted(format!(
                    "idle for {}s after {} bytes",
                    limits.idle_read_timeout.as_secs(),
                    summary.bytes
                ))
                .log(),
                RelayOutcome::UpstreamError(cause) => GatewayError::StreamInterrupted(format!(
                    "{cause} after {} bytes",
                    summary.bytes
                ))
                .log(),
            }
        }
        .instrument(producer_span),
    );

    Ok(RelayBody {
        rx,
        _cancel_on_drop: cancel.drop_guard(),
    })
}

/// The first non-empty chunk, or `None` if the upstream ended without one.
pub async fn first_chunk<S, E>(
    upstream: &mut S,
    idle_read_timeout: Duration,
) -> Result<Option<Bytes>, GatewayError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let wait = async {
        while let Some(chunk) = upstream.next().await {
            let chunk = chunk.map_err(|e| {
                GatewayError::UpstreamUnavailable(format!("stream failed before first byte: {e}"))
            })?;
            if !chunk.is_empty() {
                return Ok(Some(chunk));
            }
        }
        Ok(None)
    };
    match tokio::time::timeout(idle_read_timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::UpstreamUnavailable(format!(
            "no stream bytes within {}s",
            idle_read_timeout.as_secs()
        ))),
    }
}

/// Copy chunks from `upstream` into `tx` until the upstream ends, fails, goes
/// idle, or the client goes away.
pub async fn pump<S, E>(
    upstream: S,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    idle_read_timeout: Duration,
    started: Instant,
    span: &tracing::Span,
) -> RelaySummary
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut upstream = std::pin::pin!(upstream);
    let mut tracker = FrameTracker::default();
    let mut first_chunk_seen = false;

    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break RelayOutcome::ClientCancelled,
            next = tokio::time::timeout(idle_read_timeout, upstream.next()) => next,
        };
        let chunk = match next {
            Err(_) => break RelayOutcome::IdleTimeout,
            Ok(None) => break RelayOutcome::Completed,
            Ok(Some(Err(e))) => break RelayOutcome::UpstreamError(e.to_string()),
            Ok(Some(Ok(chunk))) => chunk,
        };
        if chunk.is_empty() {
            continue;
        }
        if !first_chunk_seen {
            first_chunk_seen = true;
            span.record("ttfb_ms", started.elapsed().as_millis() as u64);
        }
        tracker.observe(&chunk);
        if !send(&tx, &cancel, chunk).await {
            break RelayOutcome::ClientCancelled;
        }
    };

    if outcome.needs_error_frame() {
        let frame = StreamEvent::Error {
            content: APOLOGY_MESSAGE.to_string(),
        }
        .to_frame();
        let mut tail = BytesMut::with_capacity(frame.len() + 2);
        tail.extend_from_slice(tracker.closing_bytes());
        tail.extend_from_slice(&frame);
        let tail = tail.freeze();
        tracker.observe(&tail);
        send(&tx, &cancel, tail).await;
    }

    RelaySummary {
        outcome,
        bytes: tracker.bytes(),
        frames: tracker.frames(),
    }
}

/// Returns false if the client is gone.
async fn send(tx: &mpsc::Sender<Bytes>, cancel: &CancellationToken, chunk: Bytes) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(chunk) => sent.is_ok(),
    }
}

/// Wrap a relay body in an event-stream response.
pub fn event_stream_response(body: RelayBody, request_id: &str) -> Response {
    let mut response = (StatusCode::OK, Body::from_stream(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    type Chunk = Result<Bytes, std::io::Error>;

    fn ok(s: &'static str) -> Chunk {
        Ok(Bytes::from_static(s.as_bytes()))
    }

    async fn drain(mut rx: mpsc::Receiver<Bytes>) -> String {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_frames_forwarded_in_order() {
        let frames = [
            "data: {\"type\":\"content\",\"content\":\"Hel\"}\n\n",
            "data: {\"type\":\"content\",\"content\":\"lo\"}\n\n",
            "data: {\"type\":\"done\",\"full_response\":\"Hello\",\"sources\":[]}\n\n",
        ];
        let upstream = stream::iter(frames.map(ok));
        let (tx, rx) = mpsc::channel(1);
        let reader = tokio::spawn(drain(rx));

        let summary = pump(
            upstream,
            tx,
            CancellationToken::new(),
            Duration::from_secs(5),
            Instant::now(),
            &tracing::Span::none(),
        )
        .await;

        assert_eq!(summary.outcome, RelayOutcome::Completed);
        assert_eq!(summary.frames, 3);
        assert_eq!(reader.await.unwrap(), frames.concat());
    }

    #[tokio::test]
    async fn test_idle_upstream_closes_partial_frame_then_errors() {
        let upstream = stream::iter([ok("data: {\"type\":\"content\",\"content\":\"He")])
            .chain(stream::pending());
        let (tx, rx) = mpsc::channel(4);
        let reader = tokio::spawn(drain(rx));

        let summary = pump(
            upstream,
            tx,
            CancellationToken::new(),
            Duration::from_millis(50),
            Instant::now(),
            &tracing::Span::none(),
        )
        .await;

        assert_eq!(summary.outcome, RelayOutcome::IdleTimeout);
        let body = reader.await.unwrap();
        let frames: Vec<&str> = body.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(
            StreamEvent::from_frame(frames[1]),
            Some(StreamEvent::Error {
                content: APOLOGY_MESSAGE.to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_upstream_error_appends_error_frame() {
        let upstream = stream::iter([
            ok("data: {\"type\":\"content\",\"content\":\"Hi\"}\n\n"),
            Err(std::io::Error::other("connection reset")),
        ]);
        let (tx, rx) = mpsc::channel(4);
        let reader = tokio::spawn(drain(rx));

        let summary = pump(
            upstream,
            tx,
            CancellationToken::new(),
            Duration::from_secs(5),
            Instant::now(),
            &tracing::Span::none(),
        )
        .await;

        assert_eq!(
            summary.outcome,
            RelayOutcome::UpstreamError("connection reset".to_string())
        );
        let body = reader.await.unwrap();
        assert!(body.starts_with("data: {\"type\":\"content\",\"content\":\"Hi\"}\n\ndata: {\"type\":\"error\""));
        assert!(body.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_a_hanging_upstream() {
        let upstream = stream::pending::<Chunk>();
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                pump(
                    upstream,
                    tx,
                    cancel,
                    Duration::from_secs(60),
                    Instant::now(),
                    &tracing::Span::none(),
                )
                .await
            }
        });
        cancel.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.outcome, RelayOutcome::ClientCancelled);
    }

    #[tokio::test]
    async fn test_dropped_receiver_counts_as_cancelled() {
        let upstream = stream::iter([ok("data: a\n\n"), ok("data: b\n\n")]);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let summary = pump(
            upstream,
            tx,
            CancellationToken::new(),
            Duration::from_secs(5),
            Instant::now(),
            &tracing::Span::none(),
        )
        .await;
        assert_eq!(summary.outcome, RelayOutcome::ClientCancelled);
    }

    #[tokio::test]
    async fn test_first_chunk_skips_empty_chunks() {
        let mut upstream = stream::iter([ok(""), ok("data: a\n\n"), ok("data: b\n\n")]);
        let first = first_chunk(&mut upstream, Duration::from_secs(5)).await.unwrap();
        assert_eq!(first, Some(Bytes::from_static(b"data: a\n\n")));
    }

    #[tokio::test]
    async fn test_silent_upstream_is_unavailable() {
        let mut upstream = stream::pending::<Chunk>();
        let err = first_chunk(&mut upstream, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable(_)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_error_before_first_byte_is_unavailable() {
        let mut upstream = stream::iter([Err::<Bytes, _>(std::io::Error::other("reset"))]);
        let err = first_chunk(&mut upstream, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_empty_upstream_has_no_first_chunk() {
        let mut upstream = stream::iter([ok("")]);
        let first = first_chunk(&mut upstream, Duration::from_secs(5)).await.unwrap();
        assert_eq!(first, None);
    }

    #[test]
    fn test_dropping_body_cancels_producer() {
        let cancel = CancellationToken::new();
        let (_tx, rx) = mpsc::channel::<Bytes>(1);
        let body = RelayBody {
            rx,
            _cancel_on_drop: cancel.clone().drop_guard(),
        };
        assert!(!cancel.is_cancelled());
        drop(body);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_event_stream_headers() {
        let (_tx, rx) = mpsc::channel::<Bytes>(1);
        let body = RelayBody {
            rx,
            _cancel_on_drop: CancellationToken::new().drop_guard(),
        };
        let response = event_stream_response(body, "req-1");
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");
        assert_eq!(headers[REQUEST_ID_HEADER], "req-1");
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
    }
}
