//! HTTP route handlers.

pub mod admin;
pub mod chat;

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;

use crate::proxy::correlation::REQUEST_ID_HEADER;

/// The directly connected peer, when the server was started with connect
/// info. Absent under in-process test transports.
#[derive(Debug, Clone, Copy)]
pub struct PeerAddr(pub Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for PeerAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0),
        ))
    }
}

/// Stamp the request ID and any extra headers onto a finished response.
pub(crate) fn finish(mut response: Response, request_id: &str, extra: HeaderMap) -> Response {
    let headers = response.headers_mut();
    headers.extend(extra);
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    response
}
