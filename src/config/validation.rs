//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate the upstream URL and token endpoint paths
//! - Validate value ranges (lifetimes > 0, timeouts > 0)
//! - Check driver-specific requirements (redis needs a URL)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::HeaderName;
use url::Url;

use crate::config::schema::{ProxyConfig, SessionDriver};

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// Human readable explanation.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match Url::parse(&config.api_url) {
        Ok(url) if url.scheme() != "http" => {
            errors.push(ValidationError::new(
                "api_url",
                format!("unsupported scheme '{}', expected http", url.scheme()),
            ));
        }
        Ok(url) if url.query().is_some() => {
            errors.push(ValidationError::new("api_url", "must not carry a query string"));
        }
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new("api_url", format!("invalid URL: {}", e))),
    }

    for (field, path) in [
        ("grant_path", &config.grant_path),
        ("revoke_path", &config.revoke_path),
        ("session.path", &config.session.path),
    ] {
        if !path.starts_with('/') {
            errors.push(ValidationError::new(field, "must start with '/'"));
        }
    }

    if config.grant_type.trim().is_empty() {
        errors.push(ValidationError::new("grant_type", "must not be empty"));
    }

    if config.session.name.trim().is_empty() {
        errors.push(ValidationError::new("session.name", "must not be empty"));
    }

    if config.session.lifetime == 0 {
        errors.push(ValidationError::new("session.lifetime", "must be greater than 0"));
    }

    if config.session.gc_interval_secs == 0 {
        errors.push(ValidationError::new("session.gc_interval_secs", "must be greater than 0"));
    }

    if config.session.driver == SessionDriver::Redis && config.session.redis_url.is_none() {
        errors.push(ValidationError::new(
            "session.redis_url",
            "required when session.driver = \"redis\"",
        ));
    }

    if HeaderName::from_bytes(config.csrf.header.to_ascii_lowercase().as_bytes()).is_err() {
        errors.push(ValidationError::new("csrf.header", "must be a valid header name"));
    }

    if config.csrf.cookie.trim().is_empty() {
        errors.push(ValidationError::new("csrf.cookie", "must not be empty"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if config.timeouts.upstream_secs == 0 {
        errors.push(ValidationError::new("timeouts.upstream_secs", "must be greater than 0"));
    }

    if config.observability.statistics_interval_secs == 0 {
        errors.push(ValidationError::new(
            "observability.statistics_interval_secs",
            "must be greater than 0",
        ));
    }

    if config.client_credentials.enabled && config.client_credentials.retry_delay_secs == 0 {
        errors.push(ValidationError::new(
            "client_credentials.retry_delay_secs",
            "must be greater than 0",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ProxyConfig::default();
        config.api_url = "ftp://api.example.test".to_string();
        config.grant_path = "auth/token".to_string();
        config.session.lifetime = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["api_url", "grant_path", "session.lifetime"]);
    }

    #[test]
    fn redis_driver_requires_url() {
        let mut config = ProxyConfig::default();
        config.session.driver = SessionDriver::Redis;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "session.redis_url");
    }

    #[test]
    fn csrf_header_must_be_a_header_name() {
        let mut config = ProxyConfig::default();
        config.csrf.header = "x xsrf token".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "csrf.header");
    }
}
