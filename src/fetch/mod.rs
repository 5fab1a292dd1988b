//! Source image fetching.
//!
//! The pipeline only depends on the [`SourceFetcher`] trait; [`HttpFetcher`]
//! is the production implementation over `reqwest`.
//!
//! # Limits
//!
//! - The whole exchange (headers and body) is bounded by one timeout
//! - Bodies larger than `max_bytes` are refused, first from `Content-Length`
//!   and again while streaming for chunked or lying responses
//! - Redirects are not followed, so a permitted host cannot bounce the
//!   gateway to an address the source policy would have rejected

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::GatewayError;

/// Errors fetching a source image
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("source returned 404")]
    NotFound,

    #[error("source returned status {0}")]
    Status(u16),

    #[error("source body of {size} bytes exceeds limit of {max_size} bytes")]
    TooLarge { size: u64, max_size: u64 },

    #[error("source fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    pub fn into_gateway_error(self, url: &Url) -> GatewayError {
        match self {
            FetchError::NotFound => GatewayError::SourceNotFound {
                url: url.to_string(),
            },
            FetchError::TooLarge { size, max_size } => {
                GatewayError::SourceTooLarge { size, max_size }
            }
            FetchError::Timeout(timeout) => GatewayError::SourceTimeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            FetchError::Status(status) => GatewayError::SourceFetchFailed {
                message: format!("source returned status {}", status),
            },
            FetchError::Network(message) => GatewayError::SourceFetchFailed { message },
        }
    }
}

/// Retrieves raw source bytes
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &Url,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<Bytes, FetchError>;
}

/// `reqwest`-backed fetcher with a shared connection pool
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("imgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn fetch_inner(&self, url: &Url, max_bytes: usize) -> Result<Bytes, FetchError> {
        let mut response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "image/*")
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let max_size = max_bytes as u64;
        if let Some(length) = response.content_length() {
            if length > max_size {
                return Err(FetchError::TooLarge {
                    size: length,
                    max_size,
                });
            }
        }

        let mut body = BytesMut::with_capacity(
            response
                .content_length()
                .map(|len| len as usize)
                .unwrap_or(0)
                .min(max_bytes),
        );
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?
        {
            if body.len() + chunk.len() > max_bytes {
                return Err(FetchError::TooLarge {
                    size: (body.len() + chunk.len()) as u64,
                    max_size,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %url, bytes = body.len(), "Fetched source image");
        Ok(body.freeze())
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &Url,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<Bytes, FetchError> {
        tokio::time::timeout(timeout, self.fetch_inner(url, max_bytes))
            .await
            .map_err(|_| FetchError::Timeout(timeout))?
    }
}
