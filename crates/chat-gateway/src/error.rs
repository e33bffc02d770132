//! Per-request error taxonomy and its JSON rendering.
//!
//! Only messages authored here ever reach the client. Upstream causes are
//! carried for logging and never rendered.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Generic message shown whenever the upstream could not be reached.
pub const UNAVAILABLE_MESSAGE: &str = "Failed to process request";

/// Generic message shown when the upstream answered with a failure status.
pub const BACKEND_ERROR_MESSAGE: &str = "Backend error";

/// Plain-language text for chat surfaces that display errors to end users.
pub const APOLOGY_MESSAGE: &str = "I apologize, but I encountered an issue. Please try again.";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed or incomplete request. No upstream call has been made.
    #[error("invalid request: {0}")]
    ClientInput(&'static str),

    /// No usable credential was presented.
    #[error("authentication required: {0}")]
    Authentication(&'static str),

    /// A credential was presented but lacks the required privilege.
    #[error("insufficient privilege")]
    Authorization,

    /// Connect, queueing or header timeout before any response was committed.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream answered with a non-success status.
    #[error("upstream returned status {status}")]
    UpstreamProtocol { status: StatusCode },

    /// Failure after the response was committed. Logged, never rendered.
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
}

/// Error body for chat surfaces, which show `response` to the end user.
#[derive(Debug, Serialize)]
pub struct ApologyBody {
    pub error: &'static str,
    pub response: &'static str,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ClientInput(_) => StatusCode::BAD_REQUEST,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamProtocol { status } => *status,
            Self::StreamInterrupted(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// The message safe to show to the caller.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::ClientInput(msg) => *msg,
            Self::Authentication(msg) => *msg,
            Self::Authorization => "Forbidden - Admin access required",
            Self::UpstreamUnavailable(_) => UNAVAILABLE_MESSAGE,
            Self::UpstreamProtocol { .. } => BACKEND_ERROR_MESSAGE,
            Self::StreamInterrupted(_) => BACKEND_ERROR_MESSAGE,
        }
    }
}

impl GatewayError {
    pub(crate) fn log(&self) {
        match self {
            Self::UpstreamUnavailable(cause) => {
                tracing::error!(cause = %cause, "Upstream unavailable");
            }
            Self::UpstreamProtocol { status } => {
                tracing::warn!(status = status.as_u16(), "Upstream returned failure status");
            }
            Self::StreamInterrupted(cause) => {
                tracing::error!(cause = %cause, "Upstream stream interrupted");
            }
            _ => {}
        }
    }

    /// Render with the plain-language apology alongside the error.
    pub fn into_apology_response(self) -> Response {
        self.log();
        let body = ApologyBody {
            error: self.public_message(),
            response: APOLOGY_MESSAGE,
        };
        (self.status(), Json(body)).into_response()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.log();
        let body = ErrorBody {
            error: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}
