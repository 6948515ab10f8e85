use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScoutError;

/// Where a scan target came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetSource {
    Seed,
    AsnRange,
    #[default]
    Manual,
}

impl TargetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetSource::Seed => "seed",
            TargetSource::AsnRange => "asn_range",
            TargetSource::Manual => "manual",
        }
    }
}

impl std::fmt::Display for TargetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single (ip, port) pair queued for scanning
///
/// Identity is `(ip, port)`; priority and provenance do not take part in
/// equality or hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTarget {
    pub ip: String,
    pub port: u16,
    /// 0.0 - 1.0, higher scans sooner
    pub priority: f64,
    pub source: TargetSource,
    pub last_scan: Option<DateTime<Utc>>,
}

impl ScanTarget {
    /// A manually supplied target with full priority
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            priority: 1.0,
            source: TargetSource::Manual,
            last_scan: None,
        }
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority.clamp(0.0, 1.0);
        self
    }

    pub fn with_source(mut self, source: TargetSource) -> Self {
        self.source = source;
        self
    }

    /// Parsed address, if `ip` is an IP literal
    ///
    /// IPv4-mapped IPv6 addresses are folded to plain IPv4.
    pub fn ip_addr(&self) -> Option<IpAddr> {
        self.ip.trim().parse::<IpAddr>().ok().map(|addr| addr.to_canonical())
    }

    /// Canonical textual form of the address (e.g. compressed IPv6)
    pub fn canonical_ip(&self) -> String {
        canonical_ip(&self.ip)
    }
}

impl PartialEq for ScanTarget {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Eq for ScanTarget {}

impl Hash for ScanTarget {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

impl std::fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

impl FromStr for ScanTarget {
    type Err = ScoutError;

    /// Parse `ip:port` or `[ipv6]:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: SocketAddr = s
            .trim()
            .parse()
            .map_err(|e| ScoutError::InvalidTarget(format!("'{}': {}", s, e)))?;
        if addr.port() == 0 {
            return Err(ScoutError::InvalidTarget(format!("'{}': port 0", s)));
        }
        Ok(Self::new(addr.ip().to_string(), addr.port()))
    }
}

/// Normalise an address string so that equal IPs compare equal as text
pub fn canonical_ip(ip: &str) -> String {
    let trimmed = ip.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(addr) => addr.to_canonical().to_string(),
        Err(_) => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_ignores_priority_and_source() {
        let a = ScanTarget::new("10.0.0.1", 1080).with_priority(0.9);
        let b = ScanTarget::new("10.0.0.1", 1080)
            .with_priority(0.1)
            .with_source(TargetSource::AsnRange);
        let c = ScanTarget::new("10.0.0.1", 3128);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<ScanTarget> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_priority_is_clamped() {
        assert_eq!(ScanTarget::new("1.2.3.4", 80).with_priority(4.0).priority, 1.0);
        assert_eq!(ScanTarget::new("1.2.3.4", 80).with_priority(-1.0).priority, 0.0);
    }

    #[test]
    fn test_display_and_canonical_ip() {
        assert_eq!(ScanTarget::new("1.2.3.4", 8080).to_string(), "1.2.3.4:8080");
        assert_eq!(ScanTarget::new("::1", 1080).to_string(), "[::1]:1080");

        assert_eq!(canonical_ip(" 2001:db8:0:0::1 "), "2001:db8::1");
        assert_eq!(canonical_ip("::ffff:192.0.2.1"), "192.0.2.1");
        assert_eq!(canonical_ip("proxy.example"), "proxy.example");
        assert_eq!(
            ScanTarget::new("::ffff:10.0.0.1", 80).ip_addr(),
            Some("10.0.0.1".parse().unwrap())
        );
        assert_eq!(ScanTarget::new("localhost", 80).ip_addr(), None);
        assert_eq!(TargetSource::AsnRange.to_string(), "asn_range");
    }

    #[test]
    fn test_parse_target() {
        let target: ScanTarget = "203.0.113.7:3128".parse().unwrap();
        assert_eq!(target, ScanTarget::new("203.0.113.7", 3128));
        assert_eq!(target.source, TargetSource::Manual);

        let v6: ScanTarget = "[2001:db8::1]:1080".parse().unwrap();
        assert_eq!(v6.ip, "2001:db8::1");

        assert!(matches!(
            "203.0.113.7".parse::<ScanTarget>(),
            Err(ScoutError::InvalidTarget(_))
        ));
        assert!("203.0.113.7:0".parse::<ScanTarget>().is_err());
    }
}
