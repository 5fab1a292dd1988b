//! Cache entry type
//!
//! - `CacheEntry`: one finished transformation, shared behind `Arc` and never
//!   mutated after it is published

use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;

use crate::image::OutputFormat;
use crate::pipeline::TransformOutput;
use crate::request::CacheKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub data: Bytes,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub created_at: Instant,
}

impl CacheEntry {
    pub fn new(key: CacheKey, output: TransformOutput) -> Self {
        Self {
            key,
            data: output.data,
            format: output.format,
            width: output.width,
            height: output.height,
            created_at: Instant::now(),
        }
    }

    /// Bytes counted against the cache ceiling
    pub fn byte_size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// An entry is expired once its age reaches the TTL
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }

    /// Time left before expiry, zero once expired
    pub fn remaining_ttl(&self, ttl: Duration) -> Duration {
        ttl.saturating_sub(self.age())
    }
}
