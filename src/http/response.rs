//! Outbound client response.
//!
//! # Responsibilities
//! - Collect the upstream status, filtered headers and body
//! - Let stages override the status and add headers such as `Set-Cookie`
//! - Produce the final response exactly once
//!
//! # Design Decisions
//! - Stage headers and upstream headers are kept apart so a retry can
//!   discard the upstream half without losing cookies
//! - Stage headers win over upstream headers of the same name
//! - `Content-Length` is always recomputed from the buffered body

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Response, StatusCode};
use bytes::{Bytes, BytesMut};
use cookie::Cookie;

use crate::http::error::ProxyError;
use crate::http::headers::{filter_headers, is_denied_response_header};

/// The response the client will receive.
#[derive(Debug, Default)]
pub struct ProxyResponse {
    status: Option<StatusCode>,
    upstream_status: Option<StatusCode>,
    headers: HeaderMap,
    upstream_headers: HeaderMap,
    body: BytesMut,
    dispatched: bool,
}

impl ProxyResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outgoing status: the override if set, else the upstream's, else 200.
    pub fn status(&self) -> StatusCode {
        self.status.or(self.upstream_status).unwrap_or(StatusCode::OK)
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Status the upstream answered with, if a response arrived.
    pub fn upstream_status(&self) -> Option<StatusCode> {
        self.upstream_status
    }

    pub fn set_upstream_status(&mut self, status: StatusCode) {
        self.upstream_status = Some(status);
    }

    /// Take the upstream headers, minus the response denylist.
    pub fn merge_upstream_headers(&mut self, headers: &HeaderMap) {
        self.upstream_headers = filter_headers(headers, is_denied_response_header);
    }

    /// Headers set by stages.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Append `cookie` to the `Set-Cookie` header.
    pub fn add_cookie(&mut self, cookie: &Cookie<'_>) -> Result<(), ProxyError> {
        let value = HeaderValue::from_str(&cookie.to_string())
            .map_err(|_| ProxyError::Internal(format!("invalid cookie {}", cookie.name())))?;
        self.headers.append(header::SET_COOKIE, value);
        Ok(())
    }

    /// Append body bytes.
    pub fn write(&mut self, data: &[u8]) -> Result<(), ProxyError> {
        if self.dispatched {
            return Err(ProxyError::AlreadyDispatched);
        }
        self.body.extend_from_slice(data);
        Ok(())
    }

    pub fn data_len(&self) -> usize {
        self.body.len()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Drop the body and the upstream headers describing it.
    pub fn discard_body(&mut self) {
        self.body.clear();
        self.upstream_headers.remove(header::CONTENT_TYPE);
    }

    /// Forget everything the upstream contributed. Stage headers survive.
    pub fn reset_upstream(&mut self) {
        self.status = None;
        self.upstream_status = None;
        self.upstream_headers.clear();
        self.body.clear();
    }

    /// Replace the upstream half with `error` rendered as JSON.
    pub fn render_error(&mut self, error: &ProxyError) {
        self.reset_upstream();
        self.status = Some(error.status_code());
        self.upstream_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body.extend_from_slice(&error.body());
    }

    /// Build the final response. A second call is an error.
    pub fn dispatch(&mut self) -> Result<Response<Body>, ProxyError> {
        if self.dispatched {
            return Err(ProxyError::AlreadyDispatched);
        }
        self.dispatched = true;

        let status = self.status();
        let mut headers = std::mem::take(&mut self.upstream_headers);
        for name in self.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }

        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::TRANSFER_ENCODING);

        let body: Bytes = if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
            self.body.clear();
            Bytes::new()
        } else {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.body.len()));
            self.body.split().freeze()
        };

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
