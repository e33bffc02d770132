//! Rate-limit and CAPTCHA challenges from the upstream.
//!
//! The gateway holds no challenge state. A challenge body is surfaced to the
//! caller unchanged and the caller resubmits with `captcha_answer` set.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeKind {
    /// 429 with a puzzle to show the end user.
    CaptchaRequired { question: Option<String> },
    /// 400 after a wrong answer.
    CaptchaFailed,
    /// 429 without a puzzle. The caller has to wait.
    RateLimited,
}

/// A challenge the upstream issued, with its original body.
#[derive(Debug, Clone)]
pub struct ChallengeResponse {
    status: StatusCode,
    kind: ChallengeKind,
    body: Bytes,
}

impl ChallengeResponse {
    /// Recognize a challenge in a non-success upstream response.
    pub fn from_upstream(status: StatusCode, body: &Bytes) -> Option<Self> {
        if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::BAD_REQUEST {
            return None;
        }
        let value: Value = serde_json::from_slice(body).ok()?;
        let flag = |name: &str| value.get(name).and_then(Value::as_bool).unwrap_or(false);

        let kind = if status == StatusCode::TOO_MANY_REQUESTS && flag("captcha_required") {
            let question = value
                .pointer("/captcha/question")
                .and_then(Value::as_str)
                .map(str::to_string);
            ChallengeKind::CaptchaRequired { question }
        } else if status == StatusCode::TOO_MANY_REQUESTS && flag("rate_limited") {
            ChallengeKind::RateLimited
        } else if status == StatusCode::BAD_REQUEST && flag("captcha_failed") {
            ChallengeKind::CaptchaFailed
        } else {
            return None;
        };

        Some(Self {
            status,
            kind,
            body: body.clone(),
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &ChallengeKind {
        &self.kind
    }

    pub fn captcha_required(&self) -> bool {
        matches!(self.kind, ChallengeKind::CaptchaRequired { .. })
    }

    pub fn captcha_failed(&self) -> bool {
        self.kind == ChallengeKind::CaptchaFailed
    }

    pub fn captcha_question(&self) -> Option<&str> {
        match &self.kind {
            ChallengeKind::CaptchaRequired { question } => question.as_deref(),
            _ => None,
        }
    }
}

impl IntoResponse for ChallengeResponse {
    fn into_response(self) -> Response {
        tracing::info!(status = self.status.as_u16(), kind = ?self.kind, "Surfacing upstream challenge");
        (
            self.status,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            self.body,
        )
            .into_response()
    }
}
