// Server module - Pingora HTTP application wrapping the gateway

use async_trait::async_trait;
use http::header::{ACCEPT, IF_NONE_MATCH};
use http::{HeaderMap, Response, StatusCode};
use pingora_core::apps::http_app::ServeHttp;
use pingora_core::protocols::http::ServerSession;
use pingora_core::services::listening::Service;
use pingora_http::RequestHeader;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::gateway::{GatewayRequest, GatewayResponse, ImageGateway};

/// Pingora application serving `/image`, `/health` and `/metrics`
pub struct GatewayApp {
    gateway: Arc<ImageGateway>,
}

impl GatewayApp {
    pub fn new(gateway: Arc<ImageGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ServeHttp for GatewayApp {
    async fn response(&self, http_session: &mut ServerSession) -> Response<Vec<u8>> {
        let request = to_gateway_request(http_session.req_header());
        let response = self.gateway.handle(&request).await;
        into_http_response(response)
    }
}

/// Build the listening service for the gateway
pub fn gateway_service(gateway: Arc<ImageGateway>, config: &ServerConfig) -> Service<GatewayApp> {
    let mut service = Service::new("imgate".to_string(), GatewayApp::new(gateway));
    service.add_tcp(&config.listen_addr());
    service.threads = Some(config.threads);
    service
}

fn header_str(headers: &HeaderMap, name: http::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn to_gateway_request(header: &RequestHeader) -> GatewayRequest {
    GatewayRequest {
        method: header.method.as_str().to_string(),
        path: header.uri.path().to_string(),
        query: header.uri.query().map(str::to_string),
        accept: header_str(&header.headers, ACCEPT),
        if_none_match: header_str(&header.headers, IF_NONE_MATCH),
    }
}

pub fn into_http_response(response: GatewayResponse) -> Response<Vec<u8>> {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(*name, value.as_str());
    }

    builder.body(response.body.to_vec()).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build HTTP response");
        let mut fallback = Response::new(Vec::new());
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_gateway_request_reads_headers() {
        let mut header = RequestHeader::build(
            "GET",
            b"/image?src=https%3A%2F%2Fpicsum.photos%2F200&w=64",
            None,
        )
        .unwrap();
        header.insert_header("Accept", "image/webp,*/*").unwrap();
        header.insert_header("If-None-Match", "\"abc\"").unwrap();

        let request = to_gateway_request(&header);
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/image");
        assert_eq!(
            request.query.as_deref(),
            Some("src=https%3A%2F%2Fpicsum.photos%2F200&w=64")
        );
        assert_eq!(request.accept.as_deref(), Some("image/webp,*/*"));
        assert_eq!(request.if_none_match.as_deref(), Some("\"abc\""));
    }

    #[test]
    fn test_into_http_response_copies_headers() {
        let response = GatewayResponse::json(403, serde_json::json!({"error": "x"}))
            .with_header("X-Request-Id", "req-1");
        let http = into_http_response(response);
        assert_eq!(http.status(), StatusCode::FORBIDDEN);
        assert_eq!(http.headers()["content-type"], "application/json");
        assert_eq!(http.headers()["x-request-id"], "req-1");
        assert_eq!(http.body(), br#"{"error":"x"}"#);
    }
}
