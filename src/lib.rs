//! OAuth2 credential-injecting reverse proxy.
//!
//! Browser clients talk to this proxy with a session cookie and a CSRF
//! token; the proxy holds the OAuth2 grant server-side and forwards every
//! request to one upstream API with the right `Authorization` header.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod oauth;
pub mod observability;
pub mod resilience;
pub mod session;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{Services, Shutdown};
