//! Request canonicalization
//!
//! Turns the raw `/image?src=&w=&q=` query into a validated
//! [`TransformRequest`] and derives its [`CacheKey`]. Two requests that would
//! produce the same bytes map to the same key:
//! - scheme and host are lowercased, default ports and fragments dropped
//! - source query parameters are sorted and tracking parameters stripped
//! - width and quality are clamped (and optionally snapped to a width ladder)
//!   before keying, so `w=5000` and `w=9000` share an entry

use sha2::{Digest, Sha256};
use std::fmt;
use std::num::NonZeroU32;
use url::Url;

use crate::config::ImagesConfig;
use crate::constants::{MAX_QUALITY, MIN_QUALITY};
use crate::error::GatewayError;
use crate::image::OutputFormat;

/// Bumped whenever the key encoding or transform output changes
const KEY_VERSION: &str = "imgate-v1";

/// Query parameters as received, before any validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawImageRequest {
    pub src: String,
    pub width: Option<String>,
    pub quality: Option<String>,
}

impl RawImageRequest {
    /// Read `src`, `w` and `q` from a form-urlencoded query string.
    /// The first occurrence of a repeated parameter wins.
    pub fn from_query(query: &str) -> Result<Self, GatewayError> {
        let mut src = None;
        let mut width = None;
        let mut quality = None;

        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match name.as_ref() {
                "src" | "url" if src.is_none() => src = Some(value.into_owned()),
                "w" if width.is_none() => width = Some(value.into_owned()),
                "q" if quality.is_none() => quality = Some(value.into_owned()),
                _ => {}
            }
        }

        let src = src
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| GatewayError::invalid_param("src", "parameter is required"))?;

        Ok(Self {
            src,
            width,
            quality,
        })
    }
}

/// Requested output width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetWidth {
    /// Keep the source width
    Original,
    Pixels(NonZeroU32),
}

impl TargetWidth {
    pub fn pixels(&self) -> Option<u32> {
        match self {
            TargetWidth::Original => None,
            TargetWidth::Pixels(px) => Some(px.get()),
        }
    }
}

/// A fully validated transformation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRequest {
    pub source: Url,
    pub width: TargetWidth,
    pub quality: u8,
    pub format: OutputFormat,
}

/// Content address of one transformation result
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn from_request(req: &TransformRequest) -> Self {
        let width = req.width.pixels().unwrap_or(0).to_string();
        let quality = req.quality.to_string();

        let mut hasher = Sha256::new();
        for field in [
            KEY_VERSION,
            req.source.as_str(),
            width.as_str(),
            quality.as_str(),
            req.format.as_str(),
        ] {
            // Length prefix keeps field boundaries unambiguous
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Strong entity tag for the result
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.to_hex())
    }

    /// Stable shard selector derived from the digest
    pub fn shard_index(&self, shards: usize) -> usize {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        (u64::from_be_bytes(prefix) % shards.max(1) as u64) as usize
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", &self.to_hex()[..16])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StripRule {
    Exact(String),
    Prefix(String),
}

impl StripRule {
    fn parse(pattern: &str) -> Self {
        let lower = pattern.trim().to_ascii_lowercase();
        match lower.strip_suffix('*') {
            Some(prefix) => StripRule::Prefix(prefix.to_string()),
            None => StripRule::Exact(lower),
        }
    }

    fn matches(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        match self {
            StripRule::Exact(exact) => name == *exact,
            StripRule::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

/// Builds canonical transform requests from raw input
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    max_width: u32,
    width_ladder: Vec<u32>,
    default_quality: u8,
    strip_rules: Vec<StripRule>,
}

impl Canonicalizer {
    pub fn new(config: &ImagesConfig) -> Self {
        let mut width_ladder: Vec<u32> = config
            .allowed_widths
            .iter()
            .copied()
            .filter(|w| *w > 0 && *w <= config.max_width)
            .collect();
        width_ladder.sort_unstable();
        width_ladder.dedup();

        Self {
            max_width: config.max_width.max(1),
            width_ladder,
            default_quality: config.default_quality.clamp(MIN_QUALITY, MAX_QUALITY),
            strip_rules: config
                .strip_params
                .iter()
                .map(|p| StripRule::parse(p))
                .collect(),
        }
    }

    pub fn canonicalize(
        &self,
        raw: &RawImageRequest,
        format: OutputFormat,
    ) -> Result<(TransformRequest, CacheKey), GatewayError> {
        let request = TransformRequest {
            source: self.normalize_source(&raw.src)?,
            width: self.resolve_width(raw.width.as_deref())?,
            quality: self.resolve_quality(raw.quality.as_deref())?,
            format,
        };
        let key = CacheKey::from_request(&request);
        Ok((request, key))
    }

    /// Absolute URL with sorted, filtered query and no fragment
    pub fn normalize_source(&self, src: &str) -> Result<Url, GatewayError> {
        let mut url = Url::parse(src.trim())
            .map_err(|e| GatewayError::invalid_param("src", format!("not an absolute URL: {}", e)))?;

        if url.cannot_be_a_base() {
            return Err(GatewayError::invalid_param(
                "src",
                "not a hierarchical URL",
            ));
        }

        url.set_fragment(None);

        // Segments keep their original encoding so the fetched URL is the
        // one the client sent; names are decoded only to match strip rules.
        let mut segments: Vec<&str> = url
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|segment| !segment.is_empty())
            .filter(|segment| !self.is_stripped(segment))
            .collect();
        segments.sort_unstable();

        let query = segments.join("&");
        if query.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&query));
        }

        Ok(url)
    }

    fn is_stripped(&self, segment: &str) -> bool {
        let name = segment.split('=').next().unwrap_or_default();
        let name = url::form_urlencoded::parse(name.as_bytes())
            .next()
            .map(|(name, _)| name.into_owned())
            .unwrap_or_default();
        self.strip_rules.iter().any(|rule| rule.matches(&name))
    }

    fn resolve_width(&self, raw: Option<&str>) -> Result<TargetWidth, GatewayError> {
        let raw = match raw.map(str::trim) {
            None | Some("") => return Ok(TargetWidth::Original),
            Some(value) if value.eq_ignore_ascii_case("original") => {
                return Ok(TargetWidth::Original)
            }
            Some(value) => value,
        };

        let requested: u64 = raw.parse().map_err(|_| {
            GatewayError::invalid_param("w", format!("'{}' is not a positive integer", raw))
        })?;
        if requested == 0 {
            return Err(GatewayError::invalid_param("w", "must be greater than 0"));
        }

        let clamped = requested.min(self.max_width as u64) as u32;
        let width = self.snap_to_ladder(clamped);

        NonZeroU32::new(width)
            .map(TargetWidth::Pixels)
            .ok_or_else(|| GatewayError::internal("width resolved to 0"))
    }

    /// Nearest ladder step; ties go to the larger step
    fn snap_to_ladder(&self, width: u32) -> u32 {
        self.width_ladder
            .iter()
            .copied()
            .min_by_key(|step| (step.abs_diff(width), std::cmp::Reverse(*step)))
            .unwrap_or(width)
    }

    fn resolve_quality(&self, raw: Option<&str>) -> Result<u8, GatewayError> {
        let raw = match raw.map(str::trim) {
            None | Some("") => return Ok(self.default_quality),
            Some(value) => value,
        };

        let quality: i64 = raw.parse().map_err(|_| {
            GatewayError::invalid_param("q", format!("'{}' is not an integer", raw))
        })?;
        Ok(quality.clamp(MIN_QUALITY as i64, MAX_QUALITY as i64) as u8)
    }
}
