//! Transform pipeline and result cache configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_AVIF_SPEED, DEFAULT_CACHE_SHARDS, DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_MAX_CACHE_SIZE_MB,
    DEFAULT_MAX_CONCURRENT_TRANSFORMS, DEFAULT_MAX_SOURCE_BYTES, DEFAULT_MAX_SOURCE_PIXELS,
    DEFAULT_QUEUE_TIMEOUT_MS, DEFAULT_TTL_SECONDS,
};

fn default_max_source_bytes() -> usize {
    DEFAULT_MAX_SOURCE_BYTES
}

fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

fn default_max_concurrent_transforms() -> usize {
    DEFAULT_MAX_CONCURRENT_TRANSFORMS
}

fn default_queue_timeout_ms() -> u64 {
    DEFAULT_QUEUE_TIMEOUT_MS
}

fn default_max_source_pixels() -> u64 {
    DEFAULT_MAX_SOURCE_PIXELS
}

fn default_avif_speed() -> u8 {
    DEFAULT_AVIF_SPEED
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Largest source body accepted, in bytes (default: 50 MB)
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Transforms running at once; further work waits in a queue
    #[serde(default = "default_max_concurrent_transforms")]
    pub max_concurrent_transforms: usize,
    /// How long queued work waits for a slot before failing with 503
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    /// Decoded pixel limit, guards against decompression bombs
    #[serde(default = "default_max_source_pixels")]
    pub max_source_pixels: u64,
    #[serde(default = "default_avif_speed")]
    pub avif_speed: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: default_max_source_bytes(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            max_concurrent_transforms: default_max_concurrent_transforms(),
            queue_timeout_ms: default_queue_timeout_ms(),
            max_source_pixels: default_max_source_pixels(),
            avif_speed: default_avif_speed(),
        }
    }
}

impl PipelineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_transforms == 0 {
            return Err("pipeline.max_concurrent_transforms must be greater than 0".to_string());
        }
        if self.max_source_bytes == 0 {
            return Err("pipeline.max_source_bytes must be greater than 0".to_string());
        }
        if self.fetch_timeout_ms == 0 {
            return Err("pipeline.fetch_timeout_ms must be greater than 0".to_string());
        }
        if !(1..=10).contains(&self.avif_speed) {
            return Err(format!(
                "pipeline.avif_speed must be between 1 and 10, got {}",
                self.avif_speed
            ));
        }
        Ok(())
    }
}

fn default_max_cache_size_mb() -> u64 {
    DEFAULT_MAX_CACHE_SIZE_MB
}

fn default_ttl_seconds() -> u64 {
    DEFAULT_TTL_SECONDS
}

fn default_shards() -> usize {
    DEFAULT_CACHE_SHARDS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Byte ceiling for all resident entries, in megabytes (default: 512)
    #[serde(default = "default_max_cache_size_mb")]
    pub max_size_mb: u64,
    /// Entry lifetime in seconds (default: 3600)
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_mb: default_max_cache_size_mb(),
            ttl_seconds: default_ttl_seconds(),
            shards: default_shards(),
        }
    }
}

impl CacheConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_size_mb == 0 {
            return Err("cache.max_size_mb must be greater than 0".to_string());
        }
        if self.ttl_seconds == 0 {
            return Err("cache.ttl_seconds must be greater than 0".to_string());
        }
        if self.shards == 0 {
            return Err("cache.shards must be greater than 0".to_string());
        }
        Ok(())
    }
}
