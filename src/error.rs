// Error types module

use crate::policy::Rejection;

/// Broad error category reported to clients next to the HTTP status.
///
/// The category tells a client whether retrying can help (`Transient`) or
/// whether the request itself must change (`Policy`, `Input`, `Codec`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Untrusted or forbidden source
    Policy,
    /// Malformed request parameters or an unusable source
    Input,
    /// Timeouts, capacity limits and upstream failures
    Transient,
    /// Corrupt source or unsupported target encoding
    Codec,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Policy => "policy",
            ErrorKind::Input => "input",
            ErrorKind::Transient => "transient",
            ErrorKind::Codec => "codec",
        }
    }
}

/// Centralized error type for the gateway
///
/// Errors are `Clone` because a single failed computation is delivered to
/// every request that was coalesced onto it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid parameter '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Source not allowed: {0}")]
    SourceNotAllowed(Rejection),

    #[error("Source returned 404: {url}")]
    SourceNotFound { url: String },

    #[error("Failed to fetch source: {message}")]
    SourceFetchFailed { message: String },

    #[error("Source fetch timed out after {timeout_ms}ms")]
    SourceTimeout { timeout_ms: u64 },

    #[error("Source size {size} bytes exceeds maximum {max_size} bytes")]
    SourceTooLarge { size: u64, max_size: u64 },

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: String },

    #[error("Image dimensions {width}x{height} exceed limit of {max_pixels} pixels")]
    ImageTooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    #[error("Failed to resize image: {message}")]
    ResizeFailed { message: String },

    #[error("Failed to encode to {format}: {message}")]
    EncodeFailed { format: String, message: String },

    #[error("Transform capacity exceeded after waiting {waited_ms}ms")]
    CapacityExceeded { waited_ms: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn invalid_param(param: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    pub fn decode_failed(message: impl Into<String>) -> Self {
        GatewayError::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn resize_failed(message: impl Into<String>) -> Self {
        GatewayError::ResizeFailed {
            message: message.into(),
        }
    }

    pub fn encode_failed(format: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        GatewayError::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::SourceNotAllowed(_) => ErrorKind::Policy,

            GatewayError::InvalidParameter { .. }
            | GatewayError::SourceNotFound { .. }
            | GatewayError::SourceTooLarge { .. } => ErrorKind::Input,

            GatewayError::SourceFetchFailed { .. }
            | GatewayError::SourceTimeout { .. }
            | GatewayError::CapacityExceeded { .. }
            | GatewayError::Internal { .. } => ErrorKind::Transient,

            GatewayError::DecodeFailed { .. }
            | GatewayError::ImageTooLarge { .. }
            | GatewayError::ResizeFailed { .. }
            | GatewayError::EncodeFailed { .. } => ErrorKind::Codec,
        }
    }

    /// Machine-readable error code, stable across releases
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidParameter { .. } => "invalid_parameter",
            GatewayError::SourceNotAllowed(_) => "source_not_allowed",
            GatewayError::SourceNotFound { .. } => "source_not_found",
            GatewayError::SourceFetchFailed { .. } => "source_fetch_failed",
            GatewayError::SourceTimeout { .. } => "source_timeout",
            GatewayError::SourceTooLarge { .. } => "source_too_large",
            GatewayError::DecodeFailed { .. } => "decode_failed",
            GatewayError::ImageTooLarge { .. } => "source_dimensions_exceeded",
            GatewayError::ResizeFailed { .. } => "resize_failed",
            GatewayError::EncodeFailed { .. } => "encode_failed",
            GatewayError::CapacityExceeded { .. } => "capacity_exceeded",
            GatewayError::Internal { .. } => "internal_error",
        }
    }

    /// Maps gateway errors to HTTP status codes
    ///
    /// - InvalidParameter → 400
    /// - SourceNotAllowed → 403
    /// - SourceNotFound → 404
    /// - SourceFetchFailed, SourceTimeout, SourceTooLarge → 502
    /// - CapacityExceeded → 503
    /// - DecodeFailed, ImageTooLarge, ResizeFailed, EncodeFailed, Internal → 500
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::InvalidParameter { .. } => 400,
            GatewayError::SourceNotAllowed(_) => 403,
            GatewayError::SourceNotFound { .. } => 404,
            GatewayError::SourceFetchFailed { .. }
            | GatewayError::SourceTimeout { .. }
            | GatewayError::SourceTooLarge { .. } => 502,
            GatewayError::CapacityExceeded { .. } => 503,
            GatewayError::DecodeFailed { .. }
            | GatewayError::ImageTooLarge { .. }
            | GatewayError::ResizeFailed { .. }
            | GatewayError::EncodeFailed { .. }
            | GatewayError::Internal { .. } => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}
