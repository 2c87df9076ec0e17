//! Pipeline errors and their client-facing rendering.
//!
//! Every error becomes a JSON body `{"type": ..., "message": ...}`.
//! Internal details stay in the logs.

use axum::http::StatusCode;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::session::SessionError;

/// Errors that end an exchange early.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The CSRF header is missing or does not match the session token.
    #[error("CSRF token mismatch")]
    TokenMismatch,

    /// A grant request body that is not a JSON object.
    #[error("Grant request body must be a JSON object")]
    InvalidGrantBody,

    /// The client body could not be read.
    #[error("Failed to read request body: {0}")]
    RequestBody(String),

    /// The upstream API could not be reached or broke off mid-response.
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// The upstream API did not answer in time.
    #[error("Upstream request timed out")]
    UpstreamTimeout,

    /// The token endpoint answered 200 with something that is not a grant.
    #[error("Malformed grant from upstream: {0}")]
    MalformedGrant(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Response already dispatched")]
    AlreadyDispatched,

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    message: String,
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        use ProxyError::*;

        match self {
            TokenMismatch | InvalidGrantBody | RequestBody(_) => StatusCode::BAD_REQUEST,
            Upstream(_) | MalformedGrant(_) => StatusCode::BAD_GATEWAY,
            UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Session(_) | AlreadyDispatched | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of the `type` field in the error body.
    pub fn kind(&self) -> &'static str {
        use ProxyError::*;

        match self {
            TokenMismatch => "token_mismatch",
            InvalidGrantBody | RequestBody(_) => "invalid_request",
            Upstream(_) | MalformedGrant(_) => "bad_gateway",
            UpstreamTimeout => "gateway_timeout",
            Session(_) | AlreadyDispatched | Internal(_) => "error",
        }
    }

    /// Message safe to show the client.
    pub fn public_message(&self) -> String {
        use ProxyError::*;

        match self {
            TokenMismatch | InvalidGrantBody | UpstreamTimeout => self.to_string(),
            RequestBody(_) => "Failed to read request body".to_string(),
            Upstream(_) | MalformedGrant(_) => "Upstream service error".to_string(),
            Session(_) | AlreadyDispatched | Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Serialized JSON body.
    pub fn body(&self) -> Bytes {
        let body = ErrorBody {
            kind: self.kind(),
            message: self.public_message(),
        };
        serde_json::to_vec(&body)
            .map(Bytes::from)
            .unwrap_or_else(|_| Bytes::from_static(br#"{"type":"error","message":"Internal server error"}"#))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn parsed(error: &ProxyError) -> Value {
        serde_json::from_slice(&error.body()).unwrap()
    }

    #[test]
    fn token_mismatch_is_400() {
        let error = ProxyError::TokenMismatch;
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(parsed(&error)["type"], "token_mismatch");
    }

    #[test]
    fn upstream_failures_map_to_gateway_statuses() {
        assert_eq!(
            ProxyError::Upstream("refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::UpstreamTimeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(parsed(&ProxyError::UpstreamTimeout)["type"], "gateway_timeout");
    }

    #[test]
    fn internal_details_do_not_leak() {
        let error = ProxyError::Session(SessionError::Unavailable("10.0.0.7:6379 refused".into()));
        let body = parsed(&error);

        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["type"], "error");
        assert!(!body["message"].as_str().unwrap().contains("10.0.0.7"));
    }
}
