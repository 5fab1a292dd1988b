//! Source policy and image output configuration.
//!
//! `domains` and `formats` mirror the familiar front-end image settings:
//!
//! ```yaml
//! policy:
//!   domains: [images.unsplash.com, "*.cdn.example.com"]
//! images:
//!   formats: [image/webp, image/avif]
//! ```

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_FALLBACK_FORMAT, DEFAULT_FORMATS, DEFAULT_MAX_WIDTH, DEFAULT_QUALITY, DEFAULT_SCHEMES,
    DEFAULT_STRIP_PARAMS, MAX_QUALITY, MIN_QUALITY,
};
use crate::image::OutputFormat;

fn default_schemes() -> Vec<String> {
    DEFAULT_SCHEMES.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Host patterns: exact hosts or `*.suffix` (one label)
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default = "default_schemes")]
    pub schemes: Vec<String>,
    /// Extra IP/CIDR ranges to refuse on top of the built-in internal ranges
    #[serde(default)]
    pub blocked_ranges: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            schemes: default_schemes(),
            blocked_ranges: Vec::new(),
        }
    }
}

fn default_formats() -> Vec<OutputFormat> {
    DEFAULT_FORMATS
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect()
}

fn default_fallback_format() -> OutputFormat {
    DEFAULT_FALLBACK_FORMAT
        .parse()
        .unwrap_or(OutputFormat::Jpeg)
}

fn default_max_width() -> u32 {
    DEFAULT_MAX_WIDTH
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

fn default_strip_params() -> Vec<String> {
    DEFAULT_STRIP_PARAMS.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Output formats in preference order
    #[serde(default = "default_formats")]
    pub formats: Vec<OutputFormat>,
    /// Served when the client accepts none of `formats`
    #[serde(default = "default_fallback_format")]
    pub fallback_format: OutputFormat,
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    /// Optional width ladder; requested widths snap to the nearest step
    #[serde(default)]
    pub allowed_widths: Vec<u32>,
    #[serde(default = "default_quality")]
    pub default_quality: u8,
    /// Source query parameters dropped before keying (`name` or `prefix*`)
    #[serde(default = "default_strip_params")]
    pub strip_params: Vec<String>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            formats: default_formats(),
            fallback_format: default_fallback_format(),
            max_width: default_max_width(),
            allowed_widths: Vec::new(),
            default_quality: default_quality(),
            strip_params: default_strip_params(),
        }
    }
}

impl ImagesConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_width == 0 {
            return Err("images.max_width must be greater than 0".to_string());
        }
        if !(MIN_QUALITY..=MAX_QUALITY).contains(&self.default_quality) {
            return Err(format!(
                "images.default_quality must be between {} and {}, got {}",
                MIN_QUALITY, MAX_QUALITY, self.default_quality
            ));
        }
        if let Some(zero) = self.allowed_widths.iter().find(|w| **w == 0) {
            return Err(format!("images.allowed_widths contains invalid width {}", zero));
        }
        Ok(())
    }
}
