//! Header and cookie model.
//!
//! # Responsibilities
//! - Strip forbidden headers when crossing a trust boundary
//! - Parse the `Cookie` header into name → value pairs
//! - Build `Set-Cookie` values for the session and CSRF cookies
//!
//! # Design Decisions
//! - `http::HeaderMap` is the one canonical case-insensitive header policy
//! - Two independent denylists: client → upstream and upstream → client
//! - Malformed cookie pairs are skipped, never reported

use std::collections::HashMap;

use axum::http::header::{self, HeaderMap, HeaderName};
use cookie::{Cookie, SameSite};

use crate::config::SessionConfig;

/// Headers never forwarded from the client to the upstream API.
pub const REQUEST_DENYLIST: &[&str] = &[
    "user-agent",
    "host",
    "cookie",
    "proxy-authorization",
];

/// Headers never forwarded from the upstream API to the client.
pub const RESPONSE_DENYLIST: &[&str] = &["server", "vary", "proxy-authenticate", "content-length"];

/// Hop-by-hop headers, dropped in both directions.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// True if an upstream header must not reach the client.
pub fn is_denied_response_header(name: &HeaderName) -> bool {
    RESPONSE_DENYLIST.contains(&name.as_str())
        || is_hop_by_hop(name)
        || name.as_str().starts_with("access-control-")
}

/// True if a client header must not reach the upstream API.
pub fn is_denied_request_header(name: &HeaderName) -> bool {
    REQUEST_DENYLIST.contains(&name.as_str()) || is_hop_by_hop(name)
}

/// Copy `headers`, dropping every name for which `denied` returns true.
pub fn filter_headers(headers: &HeaderMap, denied: impl Fn(&HeaderName) -> bool) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !denied(name) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

/// Parse every `Cookie` header into a name → value map.
///
/// Later duplicates win. Pairs without `=` or with an empty name are ignored.
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();

    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else {
            continue;
        };
        for parsed in Cookie::split_parse(raw) {
            match parsed {
                Ok(cookie) if !cookie.name().is_empty() => {
                    cookies.insert(cookie.name().to_string(), cookie.value().to_string());
                }
                _ => continue,
            }
        }
    }

    cookies
}

/// Build the HttpOnly cookie that carries the session ID.
pub fn session_cookie(config: &SessionConfig, session_id: &str) -> Cookie<'static> {
    let mut cookie = base_cookie(config, config.name.clone(), session_id.to_string());
    cookie.set_http_only(true);
    cookie
}

/// Build the script-readable cookie that hands the CSRF token to the client.
pub fn csrf_cookie(config: &SessionConfig, name: &str, token: &str) -> Cookie<'static> {
    let mut cookie = base_cookie(config, name.to_string(), token.to_string());
    cookie.set_http_only(false);
    cookie
}

fn base_cookie(config: &SessionConfig, name: String, value: String) -> Cookie<'static> {
    let mut builder = Cookie::build((name, value))
        .path(config.path.clone())
        .max_age(cookie::time::Duration::minutes(config.lifetime as i64))
        .secure(config.secure)
        .same_site(SameSite::Lax);

    if let Some(domain) = &config.domain {
        builder = builder.domain(domain.clone());
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn request_filter_strips_agent_host_and_cookie() {
        let raw = headers(&[
            ("user-agent", "curl/8"),
            ("host", "proxy.local"),
            ("cookie", "a=b"),
            ("accept", "application/json"),
            ("keep-alive", "timeout=5"),
        ]);

        let filtered = filter_headers(&raw, is_denied_request_header);

        assert!(filtered.get("user-agent").is_none());
        assert!(filtered.get("host").is_none());
        assert!(filtered.get("cookie").is_none());
        assert!(filtered.get("keep-alive").is_none());
        assert_eq!(filtered.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn response_filter_strips_server_and_cors() {
        let raw = headers(&[
            ("server", "nginx"),
            ("vary", "Origin"),
            ("access-control-allow-origin", "*"),
            ("access-control-allow-headers", "x-custom"),
            ("connection", "keep-alive"),
            ("content-type", "application/json"),
            ("x-ratelimit-remaining", "10"),
        ]);

        let filtered = filter_headers(&raw, is_denied_response_header);

        assert_eq!(filtered.len(), 2);
        assert!(filtered.contains_key("content-type"));
        assert!(filtered.contains_key("x-ratelimit-remaining"));
    }

    #[test]
    fn filter_keeps_multi_values() {
        let raw = headers(&[("link", "<a>"), ("link", "<b>")]);
        let filtered = filter_headers(&raw, is_denied_response_header);
        assert_eq!(filtered.get_all("link").iter().count(), 2);
    }

    #[test]
    fn parses_cookie_pairs_trimmed() {
        let raw = headers(&[("cookie", "session=abc123;  XSRF-TOKEN=tok ; theme=dark")]);
        let cookies = parse_cookies(&raw);

        assert_eq!(cookies.get("session").map(String::as_str), Some("abc123"));
        assert_eq!(cookies.get("XSRF-TOKEN").map(String::as_str), Some("tok"));
        assert_eq!(cookies.get("theme").map(String::as_str), Some("dark"));
    }

    #[test]
    fn malformed_cookie_pairs_are_skipped() {
        let raw = headers(&[("cookie", "garbage; =novalue; ok=1")]);
        let cookies = parse_cookies(&raw);

        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies.get("ok").map(String::as_str), Some("1"));
    }

    #[test]
    fn absent_cookie_header_is_empty() {
        assert!(parse_cookies(&HeaderMap::new()).is_empty());
    }

    #[test]
    fn session_cookie_is_http_only() {
        let config = SessionConfig {
            domain: Some("app.example.test".to_string()),
            secure: true,
            ..SessionConfig::default()
        };
        let rendered = session_cookie(&config, "abc").to_string();

        assert!(rendered.starts_with("oauth2_proxy_session=abc"));
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.contains("Secure"));
        assert!(rendered.contains("Domain=app.example.test"));
        assert!(rendered.contains("Max-Age=7200"));
    }

    #[test]
    fn csrf_cookie_is_script_readable() {
        let rendered = csrf_cookie(&SessionConfig::default(), "XSRF-TOKEN", "tok").to_string();
        assert!(rendered.starts_with("XSRF-TOKEN=tok"));
        assert!(!rendered.contains("HttpOnly"));
        assert!(rendered.contains("Path=/"));
    }
}
