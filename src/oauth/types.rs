//! OAuth2 grant record and exchange errors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Result of a grant exchange, persisted verbatim into the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub token_type: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Any further fields the authorization server returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Grant {
    /// Parse a token endpoint response body.
    pub fn from_slice(body: &[u8]) -> Result<Self, GrantError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Value for the outbound `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Keep `previous`'s refresh token when this grant came back without one.
    pub fn inherit_refresh_token(mut self, previous: &Grant) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = previous.refresh_token.clone();
        }
        self
    }
}

/// Errors raised by side-channel token exchanges.
#[derive(Debug, Error)]
pub enum GrantError {
    /// The token endpoint could not be reached.
    #[error("Token endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The token endpoint answered with a non-success status.
    #[error("Token endpoint rejected the exchange with status {status}")]
    Rejected { status: u16, body: String },

    /// The token endpoint answered with something that is not a grant.
    #[error("Malformed grant: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grant_and_keeps_extra_fields() {
        let grant = Grant::from_slice(
            br#"{"token_type":"Bearer","access_token":"a1","refresh_token":"r1","expires_in":3600,"scope":"read"}"#,
        )
        .unwrap();

        assert_eq!(grant.authorization(), "Bearer a1");
        assert_eq!(grant.refresh_token.as_deref(), Some("r1"));
        assert_eq!(grant.expires_in, Some(3600));
        assert_eq!(grant.extra.get("scope"), Some(&Value::from("read")));

        let round = serde_json::to_value(&grant).unwrap();
        assert_eq!(round["scope"], "read");
    }

    #[test]
    fn missing_access_token_is_malformed() {
        let err = Grant::from_slice(br#"{"token_type":"Bearer"}"#).unwrap_err();
        assert!(matches!(err, GrantError::Malformed(_)));
    }

    #[test]
    fn refresh_token_survives_when_not_reissued() {
        let previous = Grant::from_slice(
            br#"{"token_type":"Bearer","access_token":"old","refresh_token":"keep"}"#,
        )
        .unwrap();
        let fresh =
            Grant::from_slice(br#"{"token_type":"Bearer","access_token":"new"}"#).unwrap();

        let merged = fresh.inherit_refresh_token(&previous);
        assert_eq!(merged.access_token, "new");
        assert_eq!(merged.refresh_token.as_deref(), Some("keep"));
    }
}
