//! Prioritised target generation
//!
//! Seed IPs are expanded over every common proxy port first; then random
//! hosts are sampled from high-reputation ASN ranges and probed on a
//! reduced port subset. Targets are produced lazily.

use std::collections::{HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use ipnet::{IpNet, Ipv4Net};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::asn::AsnReputation;
use crate::config::TargetConfig;
use crate::models::{canonical_ip, AsnInfo, RiskLevel, ScanEstimate, ScanTarget, TargetSource};

/// Ports on which proxies are historically found, most likely first
pub const COMMON_PROXY_PORTS: [u16; 14] = [
    1080, // SOCKS
    1081, // SOCKS
    3128, // HTTP proxy
    8080, // HTTP proxy alt
    8081, // HTTP proxy alt
    8888, // HTTP proxy alt
    9050, // Tor SOCKS
    9150, // Tor Browser
    7070,
    8118, // Privoxy
    8123, // Polipo
    9999,
    4444,
    6666,
];

pub const SEED_PRIORITY: f64 = 0.9;
pub const RANGE_PRIORITY: f64 = 0.7;

const SECONDS_PER_TARGET: f64 = 0.5;
const MB_PER_TARGET: f64 = 0.001;
const MEDIUM_RISK_TARGETS: usize = 1000;

/// Chooses what to scan next
pub struct TargetSelector {
    asn: Arc<dyn AsnReputation>,
    config: TargetConfig,
    ports: Vec<u16>,
}

impl TargetSelector {
    pub fn new(asn: Arc<dyn AsnReputation>, config: TargetConfig) -> Self {
        Self {
            asn,
            config,
            ports: COMMON_PROXY_PORTS.to_vec(),
        }
    }

    /// Replace the common port list
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    /// ASN metadata for an address, used to annotate findings
    pub async fn asn_info(&self, ip: &str) -> Option<AsnInfo> {
        self.asn.lookup(ip).await
    }

    /// Lazily generate at most `max_targets` targets
    pub async fn generate_targets(&self, seed_ips: &[String], max_targets: usize) -> TargetIter {
        self.generate_targets_with_rng(seed_ips, max_targets, StdRng::from_entropy())
            .await
    }

    /// As `generate_targets`, with a caller-supplied RNG for host sampling
    pub async fn generate_targets_with_rng(
        &self,
        seed_ips: &[String],
        max_targets: usize,
        rng: StdRng,
    ) -> TargetIter {
        let mut seen = HashSet::new();
        let seeds: VecDeque<String> = seed_ips
            .iter()
            .map(|ip| canonical_ip(ip))
            .filter(|ip| !ip.is_empty() && seen.insert(ip.clone()))
            .collect();

        let ranges: VecDeque<IpNet> = self
            .asn
            .high_value_ranges(self.config.min_reputation)
            .await
            .into_iter()
            .flat_map(|r| r.ranges)
            .take(self.config.ranges_per_scan)
            .collect();

        info!(
            "Generating up to {} targets from {} seed(s) and {} range(s)",
            max_targets,
            seeds.len(),
            ranges.len()
        );

        let range_ports = self
            .ports
            .iter()
            .copied()
            .take(self.config.range_port_count)
            .collect();

        TargetIter {
            seeds,
            ranges,
            hosts: VecDeque::new(),
            pending: VecDeque::new(),
            seed_ports: self.ports.clone(),
            range_ports,
            hosts_per_range: self.config.hosts_per_range,
            max_targets,
            emitted: 0,
            rng,
        }
    }

    /// Rough size, duration and bandwidth of scanning `targets`
    pub fn estimate_scan_size(&self, targets: &[ScanTarget]) -> ScanEstimate {
        let total_targets = targets.len();
        ScanEstimate {
            total_targets,
            estimated_duration_seconds: total_targets as f64 * SECONDS_PER_TARGET,
            estimated_bandwidth_mb: total_targets as f64 * MB_PER_TARGET,
            risk_level: if total_targets < MEDIUM_RISK_TARGETS {
                RiskLevel::Low
            } else {
                RiskLevel::Medium
            },
        }
    }
}

/// Lazy, bounded target sequence produced by `TargetSelector`
pub struct TargetIter {
    seeds: VecDeque<String>,
    ranges: VecDeque<IpNet>,
    hosts: VecDeque<IpAddr>,
    pending: VecDeque<ScanTarget>,
    seed_ports: Vec<u16>,
    range_ports: Vec<u16>,
    hosts_per_range: usize,
    max_targets: usize,
    emitted: usize,
    rng: StdRng,
}

impl TargetIter {
    /// Queue the next batch of targets; false once every source is drained
    fn refill(&mut self) -> bool {
        if let Some(seed) = self.seeds.pop_front() {
            self.pending.extend(self.seed_ports.iter().map(|&port| {
                ScanTarget::new(seed.clone(), port)
                    .with_priority(SEED_PRIORITY)
                    .with_source(TargetSource::Seed)
            }));
            return true;
        }

        if let Some(host) = self.hosts.pop_front() {
            let ip = host.to_string();
            self.pending.extend(self.range_ports.iter().map(|&port| {
                ScanTarget::new(ip.clone(), port)
                    .with_priority(RANGE_PRIORITY)
                    .with_source(TargetSource::AsnRange)
            }));
            return true;
        }

        if let Some(range) = self.ranges.pop_front() {
            self.hosts = sample_hosts(&range, self.hosts_per_range, &mut self.rng).into();
            debug!("Sampled {} host(s) from {}", self.hosts.len(), range);
            return true;
        }

        false
    }
}

impl Iterator for TargetIter {
    type Item = ScanTarget;

    fn next(&mut self) -> Option<ScanTarget> {
        if self.emitted >= self.max_targets {
            return None;
        }

        while self.pending.is_empty() {
            if !self.refill() {
                return None;
            }
        }

        self.emitted += 1;
        self.pending.pop_front()
    }
}

/// Pick up to `count` distinct random host addresses from `range`
///
/// IPv4 only: network and broadcast addresses are skipped for prefixes
/// shorter than /31. IPv6 ranges yield nothing.
pub fn sample_hosts(range: &IpNet, count: usize, rng: &mut StdRng) -> Vec<IpAddr> {
    let IpNet::V4(net) = range else {
        debug!("Skipping IPv6 range {}", range);
        return Vec::new();
    };

    let (first, host_count) = ipv4_host_span(net);
    let amount = count.min(host_count);
    if amount == 0 {
        return Vec::new();
    }

    index::sample(rng, host_count, amount)
        .into_iter()
        .map(|offset| IpAddr::V4(Ipv4Addr::from(first + offset as u32)))
        .collect()
}

/// First usable host address and number of usable hosts
fn ipv4_host_span(net: &Ipv4Net) -> (u32, usize) {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    if net.prefix_len() >= 31 {
        (start, (end - start) as usize + 1)
    } else {
        (start + 1, (end - start - 1) as usize)
    }
}
