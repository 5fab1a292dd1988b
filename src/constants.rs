// Constants module - centralized default values for configuration
//
// Every default used by the config structs lives here so the YAML
// documentation and the code cannot drift apart.

// =============================================================================
// Server defaults
// =============================================================================

/// Default listen address
pub const DEFAULT_ADDRESS: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Default number of worker threads
pub const DEFAULT_THREADS: usize = 4;

// =============================================================================
// Policy defaults
// =============================================================================

/// Schemes permitted for source URLs when none are configured
pub const DEFAULT_SCHEMES: &[&str] = &["http", "https"];

// =============================================================================
// Image defaults
// =============================================================================

/// Output formats in preference order (most preferred first)
pub const DEFAULT_FORMATS: &[&str] = &["avif", "webp"];

/// Format served when the client accepts none of the configured formats
pub const DEFAULT_FALLBACK_FORMAT: &str = "jpeg";

/// Widest output the gateway will produce
pub const DEFAULT_MAX_WIDTH: u32 = 3840;

/// Encoder quality when the request carries no `q`
pub const DEFAULT_QUALITY: u8 = 75;

/// Quality bounds accepted from clients
pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;

/// Tracking parameters removed from source URLs before keying
pub const DEFAULT_STRIP_PARAMS: &[&str] = &["utm_*", "fbclid", "gclid"];

// =============================================================================
// Pipeline defaults
// =============================================================================

/// Default maximum source size (50 MB)
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 50 * 1024 * 1024;

/// Default source fetch timeout in milliseconds
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

/// Default number of transforms allowed to run at once
pub const DEFAULT_MAX_CONCURRENT_TRANSFORMS: usize = 4;

/// Default time a transform may wait for a worker slot
pub const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 5_000;

/// Default decoded pixel limit (100 megapixels)
pub const DEFAULT_MAX_SOURCE_PIXELS: u64 = 100_000_000;

/// Default AVIF encoder speed (1 = slowest/best, 10 = fastest)
pub const DEFAULT_AVIF_SPEED: u8 = 6;

// =============================================================================
// Cache defaults
// =============================================================================

/// Default maximum cache size in megabytes
pub const DEFAULT_MAX_CACHE_SIZE_MB: u64 = 512;

/// Default TTL in seconds
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Default number of cache shards
pub const DEFAULT_CACHE_SHARDS: usize = 16;

// =============================================================================
// Response defaults
// =============================================================================

/// Retry-After value sent with transient errors
pub const RETRY_AFTER_SECS: u64 = 5;
