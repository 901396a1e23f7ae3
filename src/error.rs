//! Gateway-wide error type and its mapping onto the two dialect error
//! envelopes (§6, §7).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

use crate::dialect::Dialect;

/// Wire-facing error taxonomy (§7). Never exposes the internal
/// classification categories of §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigurationError,
    InvalidRequestError,
    ApiError,
    NotSupportedError,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigurationError => "configuration_error",
            ErrorKind::InvalidRequestError => "invalid_request_error",
            ErrorKind::ApiError => "api_error",
            ErrorKind::NotSupportedError => "not_supported_error",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request body too large")]
    BodyTooLarge,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("all providers failed. {0}")]
    AllProvidersFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    fn status_and_kind(&self) -> (StatusCode, ErrorKind) {
        match self {
            GatewayError::Unauthorized => (StatusCode::UNAUTHORIZED, ErrorKind::ApiError),
            GatewayError::Forbidden(_) => (StatusCode::FORBIDDEN, ErrorKind::ApiError),
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorKind::InvalidRequestError),
            GatewayError::BodyTooLarge => {
                (StatusCode::PAYLOAD_TOO_LARGE, ErrorKind::InvalidRequestError)
            }
            GatewayError::InvalidRequest(_) => {
                (StatusCode::BAD_REQUEST, ErrorKind::InvalidRequestError)
            }
            GatewayError::Configuration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::ConfigurationError)
            }
            GatewayError::NotSupported(_) => {
                (StatusCode::NOT_IMPLEMENTED, ErrorKind::NotSupportedError)
            }
            GatewayError::Upstream(_) => (StatusCode::BAD_GATEWAY, ErrorKind::ApiError),
            GatewayError::AllProvidersFailed(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorKind::ApiError)
            }
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::ApiError),
        }
    }

    /// Render this error into the given source dialect's envelope (§6).
    pub fn to_envelope(&self, dialect: Dialect) -> (StatusCode, serde_json::Value) {
        let (status, kind) = self.status_and_kind();
        let message = self.to_string();
        let body = match dialect {
            Dialect::Claude => json!({
                "type": "error",
                "error": { "type": kind.as_str(), "message": message },
            }),
            Dialect::Openai => json!({
                "error": { "message": message, "type": kind.as_str() },
            }),
        };
        (status, body)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        // Operator-facing faults are logged at error level before responding;
        // client-facing faults (bad model string, oversized body) are not.
        match &self {
            GatewayError::Configuration(msg) => {
                tracing::error!(target: "gateway", "configuration error: {msg}");
            }
            GatewayError::Internal(msg) => {
                tracing::error!(target: "gateway", "internal error: {msg}");
            }
            GatewayError::AllProvidersFailed(msg) => {
                tracing::warn!(target: "gateway", "all providers failed: {msg}");
            }
            _ => {}
        }
        // Outside of a translated request context the source dialect is
        // unknown; default to claude's envelope, matching the source's
        // fallback-to-claude dialect-inference rule (§4.2 step 8).
        let (status, body) = self.to_envelope(Dialect::Claude);
        (status, Json(body)).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
