//! Response building for the gateway.
//!
//! Responses are plain values (`GatewayResponse`) so the HTTP server adapter
//! stays thin and every header rule is testable without a socket.

use bytes::Bytes;
use std::time::Duration;

use crate::cache::CacheEntry;
use crate::constants::RETRY_AFTER_SECS;
use crate::error::GatewayError;

/// Framework-agnostic HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_body(mut self, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.headers.push(("Content-Type", content_type.to_string()));
        self.headers.push(("Content-Length", body.len().to_string()));
        self.body = body;
        self
    }

    /// JSON response with the given status and body.
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self::new(status).with_body("application/json", body.to_string())
    }

    /// Plain text response (for Prometheus metrics).
    pub fn prometheus(body: String) -> Self {
        Self::new(200).with_body("text/plain; version=0.0.4", body)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Drop the body but keep every header, for HEAD requests
    pub fn without_body(mut self) -> Self {
        self.body = Bytes::new();
        self
    }
}

/// Successful image response, or 304 when the client already has it
pub fn image_response(
    entry: &CacheEntry,
    cache_label: &str,
    ttl: Duration,
    if_none_match: Option<&str>,
) -> GatewayResponse {
    let etag = entry.key.etag();
    let max_age = entry.remaining_ttl(ttl).as_secs();

    let base = |status| {
        GatewayResponse::new(status)
            .with_header("Cache-Control", format!("public, max-age={}", max_age))
            .with_header("ETag", etag.clone())
            .with_header("Vary", "Accept")
            .with_header("X-Cache", cache_label)
    };

    if if_none_match.is_some_and(|header| etag_matches(header, &etag)) {
        return base(304);
    }

    base(200).with_body(entry.content_type(), entry.data.clone())
}

/// Error response with a machine-readable JSON body
pub fn error_response(err: &GatewayError) -> GatewayResponse {
    let status = err.status();
    let body = serde_json::json!({
        "error": err.code(),
        "kind": err.kind().as_str(),
        "message": err.to_string(),
        "status": status,
        "retryable": err.is_retryable(),
    });

    let response = GatewayResponse::json(status, body);
    if err.is_retryable() {
        response
            .with_header("Retry-After", RETRY_AFTER_SECS.to_string())
            .with_header("Cache-Control", "no-store")
    } else {
        response
    }
}

/// `If-None-Match` comparison using the weak comparison function
fn etag_matches(header: &str, etag: &str) -> bool {
    let strip_weak = |tag: &str| tag.trim().trim_start_matches("W/").to_string();
    let wanted = strip_weak(etag);
    header
        .split(',')
        .map(str::trim)
        .any(|tag| tag == "*" || strip_weak(tag) == wanted)
}
