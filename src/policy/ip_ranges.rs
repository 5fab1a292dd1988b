// Literal-IP source blocking with CIDR support

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Ranges that are never valid image sources, regardless of host patterns.
///
/// Covers loopback, RFC 1918 private space, link-local (including cloud
/// metadata endpoints), CGNAT, unspecified, broadcast, multicast and IPv6
/// unique-local space.
const ALWAYS_BLOCKED: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "::/128",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
    "ff00::/8",
];

/// Represents an IP range (single IP or CIDR network)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpRange {
    Single(IpAddr),
    CidrV4 { network: Ipv4Addr, prefix_len: u8 },
    CidrV6 { network: Ipv6Addr, prefix_len: u8 },
}

impl IpRange {
    /// Parse an IP or CIDR string
    pub fn parse(s: &str) -> Result<Self, IpRangeError> {
        let s = s.trim();

        let Some((ip_str, prefix_str)) = s.split_once('/') else {
            let ip = IpAddr::from_str(s).map_err(|_| IpRangeError::InvalidIp(s.to_string()))?;
            return Ok(IpRange::Single(ip));
        };

        let prefix_len: u8 = prefix_str
            .parse()
            .map_err(|_| IpRangeError::InvalidCidr(s.to_string()))?;

        match IpAddr::from_str(ip_str) {
            Ok(IpAddr::V4(ipv4)) if prefix_len <= 32 => Ok(IpRange::CidrV4 {
                network: Ipv4Addr::from(u32::from(ipv4) & v4_mask(prefix_len)),
                prefix_len,
            }),
            Ok(IpAddr::V6(ipv6)) if prefix_len <= 128 => Ok(IpRange::CidrV6 {
                network: Ipv6Addr::from(u128::from(ipv6) & v6_mask(prefix_len)),
                prefix_len,
            }),
            Ok(_) => Err(IpRangeError::InvalidCidr(s.to_string())),
            Err(_) => Err(IpRangeError::InvalidIp(ip_str.to_string())),
        }
    }

    /// Check if an IP address matches this range
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self, ip) {
            (IpRange::Single(range_ip), ip) => range_ip == ip,
            (
                IpRange::CidrV4 {
                    network,
                    prefix_len,
                },
                IpAddr::V4(ipv4),
            ) => u32::from(*ipv4) & v4_mask(*prefix_len) == u32::from(*network),
            (
                IpRange::CidrV6 {
                    network,
                    prefix_len,
                },
                IpAddr::V6(ipv6),
            ) => u128::from(*ipv6) & v6_mask(*prefix_len) == u128::from(*network),
            (IpRange::CidrV4 { .. }, IpAddr::V6(_)) => false,
            (IpRange::CidrV6 { .. }, IpAddr::V4(_)) => false,
        }
    }
}

fn v4_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        !0u32 << (32 - prefix_len)
    }
}

fn v6_mask(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        !0u128 << (128 - prefix_len)
    }
}

/// Compiled set of blocked ranges: the built-in internal ranges plus any
/// operator-supplied extras.
#[derive(Debug, Clone)]
pub struct BlockedRanges {
    ranges: Vec<IpRange>,
}

impl BlockedRanges {
    pub fn new(extra: &[String]) -> Result<Self, IpRangeError> {
        let mut ranges = ALWAYS_BLOCKED
            .iter()
            .map(|s| IpRange::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        for s in extra {
            ranges.push(IpRange::parse(s)?);
        }
        Ok(Self { ranges })
    }

    /// Returns true if the address must never be fetched.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are checked as IPv4.
    pub fn is_blocked(&self, ip: &IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => *ip,
            },
            IpAddr::V4(_) => *ip,
        };
        self.ranges.iter().any(|range| range.contains(&ip))
    }
}

/// IP range errors
#[derive(Debug, thiserror::Error)]
pub enum IpRangeError {
    #[error("Invalid IP address: {0}")]
    InvalidIp(String),

    #[error("Invalid CIDR notation: {0}")]
    InvalidCidr(String),
}
