//! Source policy validation
//!
//! Decides whether a source image URL may be fetched:
//! - The scheme must be one of the permitted schemes (`http`, `https`)
//! - The host must match an allow-listed pattern, either an exact host
//!   (`images.unsplash.com`) or a single-label wildcard (`*.example.com`)
//! - Literal IP hosts in internal ranges are always rejected, even when a
//!   pattern would allow them
//!
//! A `SourcePolicy` is immutable. Reloading replaces the whole snapshot.

pub mod ip_ranges;

use std::collections::BTreeSet;
use std::net::IpAddr;

use url::{Host, Url};

use crate::config::PolicyConfig;
pub use ip_ranges::{BlockedRanges, IpRange, IpRangeError};

/// Reason a source URL was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("invalid source URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("scheme '{scheme}' is not permitted")]
    SchemeNotAllowed { scheme: String },

    #[error("source URL has no host")]
    MissingHost,

    #[error("address {ip} is in a private or reserved range")]
    PrivateAddress { ip: IpAddr },

    #[error("host '{host}' is not in the allow-list")]
    HostNotAllowed { host: String },
}

/// Errors building a policy from configuration
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Invalid host pattern '{0}': wildcards are only allowed as a leading '*.'")]
    InvalidPattern(String),

    #[error("Unsupported scheme '{0}': only http and https can be permitted")]
    UnsupportedScheme(String),

    #[error(transparent)]
    InvalidRange(#[from] IpRangeError),
}

/// A single allow-list entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    /// Matches exactly this host
    Exact(String),
    /// `*.suffix`: matches exactly one label in front of `suffix`
    Wildcard(String),
}

impl HostPattern {
    pub fn parse(pattern: &str) -> Result<Self, PolicyError> {
        let normalized = pattern.trim().trim_end_matches('.').to_ascii_lowercase();

        if let Some(suffix) = normalized.strip_prefix("*.") {
            if suffix.is_empty() || suffix.contains('*') || suffix.starts_with('.') {
                return Err(PolicyError::InvalidPattern(pattern.to_string()));
            }
            return Ok(HostPattern::Wildcard(suffix.to_string()));
        }

        if normalized.is_empty() || normalized.contains('*') {
            return Err(PolicyError::InvalidPattern(pattern.to_string()));
        }
        Ok(HostPattern::Exact(normalized))
    }

    /// `host` must already be lowercase.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Exact(exact) => exact == host,
            HostPattern::Wildcard(suffix) => host
                .strip_suffix(suffix.as_str())
                .and_then(|prefix| prefix.strip_suffix('.'))
                .map(|label| !label.is_empty() && !label.contains('.'))
                .unwrap_or(false),
        }
    }
}

/// Immutable snapshot of the source allow-list
#[derive(Debug, Clone)]
pub struct SourcePolicy {
    patterns: Vec<HostPattern>,
    schemes: BTreeSet<String>,
    blocked: BlockedRanges,
}

impl SourcePolicy {
    pub fn new(
        patterns: &[String],
        schemes: &[String],
        blocked_ranges: &[String],
    ) -> Result<Self, PolicyError> {
        let patterns = patterns
            .iter()
            .map(|p| HostPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut scheme_set = BTreeSet::new();
        for scheme in schemes {
            if scheme != "http" && scheme != "https" {
                return Err(PolicyError::UnsupportedScheme(scheme.clone()));
            }
            scheme_set.insert(scheme.clone());
        }

        Ok(Self {
            patterns,
            schemes: scheme_set,
            blocked: BlockedRanges::new(blocked_ranges)?,
        })
    }

    pub fn from_config(config: &PolicyConfig) -> Result<Self, PolicyError> {
        Self::new(&config.domains, &config.schemes, &config.blocked_ranges)
    }

    pub fn patterns(&self) -> &[HostPattern] {
        &self.patterns
    }

    /// Parse and validate a source URL string
    pub fn validate_str(&self, source: &str) -> Result<Url, Rejection> {
        let url = Url::parse(source).map_err(|e| Rejection::InvalidUrl {
            url: source.to_string(),
            reason: e.to_string(),
        })?;
        self.validate(&url)?;
        Ok(url)
    }

    /// Validate an already parsed source URL against this policy
    pub fn validate(&self, url: &Url) -> Result<(), Rejection> {
        if !self.schemes.contains(url.scheme()) {
            return Err(Rejection::SchemeNotAllowed {
                scheme: url.scheme().to_string(),
            });
        }

        let host = url.host().ok_or(Rejection::MissingHost)?;

        let ip = match host {
            Host::Ipv4(v4) => Some(IpAddr::V4(v4)),
            Host::Ipv6(v6) => Some(IpAddr::V6(v6)),
            Host::Domain(_) => None,
        };
        if let Some(ip) = ip {
            if self.blocked.is_blocked(&ip) {
                return Err(Rejection::PrivateAddress { ip });
            }
        }

        let host_str = url
            .host_str()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .trim_end_matches('.')
            .to_ascii_lowercase();

        if self.patterns.iter().any(|p| p.matches(&host_str)) {
            Ok(())
        } else {
            Err(Rejection::HostNotAllowed { host: host_str })
        }
    }
}
