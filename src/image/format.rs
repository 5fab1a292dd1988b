//! Output formats and Accept-header negotiation
//!
//! The gateway only ever emits one of a closed set of encodings. Negotiation
//! walks the configured preference order and picks the first format the
//! client accepts, falling back to a universally supported format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Encodings the gateway can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputFormat {
    Avif,
    WebP,
    Png,
    Jpeg,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Avif,
        OutputFormat::WebP,
        OutputFormat::Png,
        OutputFormat::Jpeg,
    ];

    /// Short lowercase name, also used in cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Avif => "avif",
            OutputFormat::WebP => "webp",
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
        }
    }

    /// MIME type for the Content-Type header
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Avif => "image/avif",
            OutputFormat::WebP => "image/webp",
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts short names (`webp`) and MIME types (`image/webp`)
impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let name = lower.strip_prefix("image/").unwrap_or(&lower);
        match name {
            "avif" => Ok(OutputFormat::Avif),
            "webp" => Ok(OutputFormat::WebP),
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            _ => Err(format!("Unsupported output format '{}'", s)),
        }
    }
}

impl TryFrom<String> for OutputFormat {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OutputFormat> for String {
    fn from(format: OutputFormat) -> Self {
        format.content_type().to_string()
    }
}

/// Parsed media range from an Accept header
#[derive(Debug, Clone, PartialEq)]
enum MediaRange {
    Exact(OutputFormat),
    AnyImage,
    Any,
}

#[derive(Debug, Clone)]
struct Preference {
    range: MediaRange,
    quality: f32,
}

/// The set of image encodings a client is willing to receive
#[derive(Debug, Clone, Default)]
pub struct AcceptedFormats {
    preferences: Vec<Preference>,
}

impl AcceptedFormats {
    /// Parse an Accept header. A missing header accepts nothing, so
    /// negotiation falls through to the fallback format.
    pub fn parse(accept_header: Option<&str>) -> Self {
        let Some(accept) = accept_header else {
            return Self::default();
        };

        let mut preferences = Vec::new();
        for part in accept.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (media_type, quality) = match part.split_once(';') {
                Some((mt, params)) => (mt.trim(), parse_quality(params)),
                None => (part, 1.0),
            };

            if let Some(range) = parse_media_range(media_type) {
                preferences.push(Preference { range, quality });
            }
        }

        Self { preferences }
    }

    /// A format is acceptable when the most specific matching range has a
    /// non-zero quality, so `image/*, image/avif;q=0` excludes AVIF.
    pub fn accepts(&self, format: OutputFormat) -> bool {
        let quality_for = |wanted: &MediaRange| {
            self.preferences
                .iter()
                .filter(|p| &p.range == wanted)
                .map(|p| p.quality)
                .fold(None, |acc: Option<f32>, q| Some(acc.map_or(q, |a| a.max(q))))
        };

        quality_for(&MediaRange::Exact(format))
            .or_else(|| quality_for(&MediaRange::AnyImage))
            .or_else(|| quality_for(&MediaRange::Any))
            .map(|q| q > 0.0)
            .unwrap_or(false)
    }

    /// Pick the first format in `preferred` the client accepts, or `fallback`.
    pub fn negotiate(&self, preferred: &[OutputFormat], fallback: OutputFormat) -> OutputFormat {
        preferred
            .iter()
            .copied()
            .find(|format| self.accepts(*format))
            .unwrap_or(fallback)
    }
}

/// Parse quality value from parameters (e.g., "q=0.8")
fn parse_quality(params: &str) -> f32 {
    for param in params.split(';') {
        let param = param.trim();
        if let Some(q) = param.strip_prefix("q=").or_else(|| param.strip_prefix("Q=")) {
            if let Ok(quality) = q.trim().parse::<f32>() {
                return quality.clamp(0.0, 1.0);
            }
        }
    }
    1.0
}

fn parse_media_range(media_type: &str) -> Option<MediaRange> {
    match media_type.to_ascii_lowercase().as_str() {
        "image/avif" => Some(MediaRange::Exact(OutputFormat::Avif)),
        "image/webp" => Some(MediaRange::Exact(OutputFormat::WebP)),
        "image/png" => Some(MediaRange::Exact(OutputFormat::Png)),
        "image/jpeg" | "image/jpg" => Some(MediaRange::Exact(OutputFormat::Jpeg)),
        "image/*" => Some(MediaRange::AnyImage),
        "*/*" => Some(MediaRange::Any),
        _ => None,
    }
}
