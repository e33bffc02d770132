//! Upstream request composition.
//!
//! Whatever identity the caller asserts in its body (`user`, or a forged
//! `verified_user`) is captured and discarded. The upstream payload's
//! `verified_user` always comes from the gateway-resolved principal.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::{Principal, VerifiedUser};
use crate::error::GatewayError;

/// One prior turn of the conversation. Passed through as the client sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The inbound chat request body.
#[derive(Debug, Deserialize)]
pub struct ChatRequestEnvelope {
    pub message: String,
    pub session_id: String,
    #[serde(default)]
    pub conversation_history: Vec<HistoryTurn>,
    /// Identity the client claims for itself. Never forwarded.
    #[serde(default, rename = "user")]
    pub client_asserted_user: Option<Value>,
    /// A client must not be able to pre-fill the verified field either.
    #[serde(default, rename = "verified_user")]
    pub client_asserted_verified_user: Option<Value>,
    #[serde(default)]
    pub captcha_answer: Option<Value>,
    /// Any other fields are forwarded untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The body sent to the upstream chat endpoints.
#[derive(Debug, Serialize)]
pub struct UpstreamPayload {
    pub message: String,
    pub session_id: String,
    pub conversation_history: Vec<HistoryTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captcha_answer: Option<Value>,
    pub verified_user: Option<VerifiedUser>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UpstreamPayload {
    pub fn to_bytes(&self) -> Result<Bytes, GatewayError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|_| GatewayError::ClientInput("Request body could not be encoded"))
    }
}

/// Parse and validate an inbound chat body. Fails before any upstream call.
pub fn parse_envelope(body: &[u8]) -> Result<ChatRequestEnvelope, GatewayError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| GatewayError::ClientInput("Request body must be valid JSON"))?;
    if !value.is_object() {
        return Err(GatewayError::ClientInput(
            "Request body must be a JSON object",
        ));
    }
    if value.get("message").and_then(Value::as_str).is_none() {
        return Err(GatewayError::ClientInput("Field 'message' is required"));
    }
    if value.get("session_id").and_then(Value::as_str).is_none() {
        return Err(GatewayError::ClientInput("Field 'session_id' is required"));
    }
    let envelope: ChatRequestEnvelope = serde_json::from_value(value)
        .map_err(|_| GatewayError::ClientInput("Request body has an invalid shape"))?;
    if envelope.message.trim().is_empty() {
        return Err(GatewayError::ClientInput("Field 'message' must not be empty"));
    }
    if envelope.session_id.trim().is_empty() {
        return Err(GatewayError::ClientInput(
            "Field 'session_id' must not be empty",
        ));
    }
    Ok(envelope)
}

/// Build the upstream payload with the gateway-verified identity.
pub fn compose(envelope: ChatRequestEnvelope, principal: &Principal) -> UpstreamPayload {
    if envelope.client_asserted_user.is_some() || envelope.client_asserted_verified_user.is_some()
    {
        tracing::debug!("Discarding client-asserted identity");
    }
    UpstreamPayload {
        message: envelope.message,
        session_id: envelope.session_id,
        conversation_history: envelope.conversation_history,
        captcha_answer: envelope.captcha_answer,
        verified_user: principal.verified_user(),
        extra: envelope.extra,
    }
}

/// Parse, validate and compose in one step, returning the encoded body.
pub fn compose_chat(body: &[u8], principal: &Principal) -> Result<Bytes, GatewayError> {
    let envelope = parse_envelope(body)?;
    compose(envelope, principal).to_bytes()
}

/// Body of the second (persona) streaming endpoint. Only these three fields
/// are forwarded.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersonaRequest {
    pub message: String,
    pub session_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
}

pub fn compose_persona(body: &[u8]) -> Result<Bytes, GatewayError> {
    let request: PersonaRequest = serde_json::from_slice(body).map_err(|_| {
        GatewayError::ClientInput("Fields 'message' and 'session_id' are required")
    })?;
    if request.message.trim().is_empty() || request.session_id.trim().is_empty() {
        return Err(GatewayError::ClientInput(
            "Fields 'message' and 'session_id' must not be empty",
        ));
    }
    serde_json::to_vec(&request)
        .map(Bytes::from)
        .map_err(|_| GatewayError::ClientInput("Request body could not be encoded"))
}
