//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status
//! - `proxy_request_duration_seconds` (histogram): end-to-end latency
//! - `proxy_token_refresh_total` (counter): grant refreshes by kind, outcome
//! - `proxy_csrf_rejections_total` (counter): requests rejected for a bad token
//! - `proxy_session_store_duration_seconds` (histogram): store round trips
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Prometheus exposition only when `metrics_enabled` is set

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one proxied request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.clone()
    )
    .increment(1);
    histogram!(
        "proxy_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}

/// Record a grant refresh attempt. `kind` is `refresh_token` or `client_credentials`.
pub fn record_token_refresh(kind: &'static str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("proxy_token_refresh_total", "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_csrf_rejection() {
    counter!("proxy_csrf_rejections_total").increment(1);
}

/// Record one session store command.
pub fn record_store_call(store: &'static str, command: &'static str, elapsed: Duration) {
    histogram!(
        "proxy_session_store_duration_seconds",
        "store" => store,
        "command" => command
    )
    .record(elapsed.as_secs_f64());
}
