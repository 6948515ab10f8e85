//! Abuse-prevention policy: blocklist and restricted ranges

use std::io;
use std::net::IpAddr;
use std::path::Path;

use dashmap::DashSet;
use ipnet::IpNet;
use tracing::info;

use crate::error::{Result, ScoutError};
use crate::models::canonical_ip;

/// IPs that must never be scanned
///
/// Loaded once at startup; entries can be added during a run but never
/// removed.
#[derive(Debug, Default)]
pub struct Blocklist {
    ips: DashSet<String>,
}

impl Blocklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse newline-delimited IP literals; `#` starts a comment line
    pub fn parse(content: &str, source: &Path) -> Result<Self> {
        let blocklist = Self::new();

        for (idx, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let ip: IpAddr = line.parse().map_err(|e| ScoutError::Blocklist {
                path: source.to_path_buf(),
                line: idx + 1,
                reason: format!("'{}': {}", line, e),
            })?;
            blocklist.ips.insert(ip.to_canonical().to_string());
        }

        Ok(blocklist)
    }

    /// Load a blocklist file. A missing file yields an empty list; an
    /// unreadable or malformed file is an error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let blocklist = Self::parse(&content, path)?;
                info!(
                    "Loaded {} IPs into blocklist from {}",
                    blocklist.len(),
                    path.display()
                );
                Ok(blocklist)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(
                    "No blocklist file at {}, starting with empty blocklist",
                    path.display()
                );
                Ok(Self::new())
            }
            Err(e) => Err(ScoutError::BlocklistIo {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    pub fn insert(&self, ip: &str) -> bool {
        self.ips.insert(canonical_ip(ip))
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.ips.contains(&canonical_ip(ip))
    }

    pub fn len(&self) -> usize {
        self.ips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for Blocklist {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let blocklist = Self::new();
        for ip in iter {
            blocklist.insert(ip.as_ref());
        }
        blocklist
    }
}

/// Predicate deciding whether an address sits in a range that must not
/// be scanned
pub trait RangePolicy: Send + Sync {
    fn is_restricted(&self, ip: &IpAddr) -> bool;

    /// Human readable name used in logs
    fn name(&self) -> &'static str;
}

/// Restricts a configured list of CIDR prefixes
#[derive(Debug, Clone, Default)]
pub struct PrefixRangePolicy {
    ranges: Vec<IpNet>,
}

impl PrefixRangePolicy {
    pub fn new(ranges: Vec<IpNet>) -> Self {
        Self { ranges }
    }
}

impl RangePolicy for PrefixRangePolicy {
    fn is_restricted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|net| net.contains(ip))
    }

    fn name(&self) -> &'static str {
        "prefix"
    }
}
