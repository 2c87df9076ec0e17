//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the OAuth2 proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Base URL of the protected API (e.g., "http://api.internal:8000").
    pub api_url: String,

    /// OAuth2 client identifier injected into grant exchanges.
    pub client_id: String,

    /// OAuth2 client secret injected into grant exchanges.
    pub client_secret: String,

    /// Upstream path that issues grants.
    pub grant_path: String,

    /// Upstream path that revokes grants.
    pub revoke_path: String,

    /// Grant type merged into requests to the grant path.
    pub grant_type: String,

    /// Interface to bind the listener on.
    pub bind_host: String,

    /// Listener port.
    pub port: u16,

    /// Session cookie and storage settings.
    pub session: SessionConfig,

    /// CSRF header and cookie names.
    pub csrf: CsrfConfig,

    /// Service-level client credentials token settings.
    pub client_credentials: ClientCredentialsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            grant_path: "/oauth/access_token".to_string(),
            revoke_path: "/oauth/revoke".to_string(),
            grant_type: "password".to_string(),
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            session: SessionConfig::default(),
            csrf: CsrfConfig::default(),
            client_credentials: ClientCredentialsConfig::default(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Address the listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    /// Full URL of the upstream grant endpoint.
    pub fn grant_url(&self) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), self.grant_path)
    }
}

/// Which backend keeps session attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionDriver {
    Memory,
    Redis,
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the cookie carrying the session ID.
    pub name: String,

    /// Session lifetime in minutes (cookie max-age and store TTL).
    pub lifetime: u64,

    /// Cookie path.
    pub path: String,

    /// Cookie domain (host-only when absent).
    pub domain: Option<String>,

    /// Mark cookies `Secure`.
    pub secure: bool,

    /// Storage backend.
    pub driver: SessionDriver,

    /// Redis connection URL, required by the redis driver.
    pub redis_url: Option<String>,

    /// Interval between expired-session sweeps in seconds.
    pub gc_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "oauth2_proxy_session".to_string(),
            lifetime: 120,
            path: "/".to_string(),
            domain: None,
            secure: false,
            driver: SessionDriver::Memory,
            redis_url: None,
            gc_interval_secs: 300,
        }
    }
}

/// CSRF protection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Request header that must echo the session token.
    pub header: String,

    /// Script-readable cookie carrying the token to the client.
    pub cookie: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            header: "x-xsrf-token".to_string(),
            cookie: "XSRF-TOKEN".to_string(),
        }
    }
}

/// Client credentials (app-level token) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientCredentialsConfig {
    /// Keep a service-level token for requests without a user grant.
    pub enabled: bool,

    /// Refresh this many seconds before the token's declared expiry.
    pub refresh_margin_secs: u64,

    /// Delay between attempts after a failed exchange.
    pub retry_delay_secs: u64,

    /// Optional scope requested with the token.
    pub scope: Option<String>,
}

impl Default for ClientCredentialsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_margin_secs: 60,
            retry_delay_secs: 5,
            scope: None,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for a proxied request/response in seconds.
    pub request_secs: u64,

    /// Time allowed for one upstream round trip in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 60,
            upstream_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// How often session store timing statistics are logged, in seconds.
    pub statistics_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            statistics_interval_secs: 30 * 60,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum inbound body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}
