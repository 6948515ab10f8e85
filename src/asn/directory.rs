use std::cmp::Ordering;
use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;
use tracing::debug;

use super::{reputation_for_org, AsnReputation};
use crate::models::{AsnInfo, NetworkKind, ReputationRange};

/// One autonomous system with its announced prefixes
#[derive(Debug, Clone, PartialEq)]
pub struct AsnRecord {
    pub info: AsnInfo,
    pub ranges: Vec<IpNet>,
}

impl AsnRecord {
    pub fn new(info: AsnInfo, ranges: &[&str]) -> Self {
        Self {
            info,
            ranges: ranges.iter().filter_map(|r| r.parse().ok()).collect(),
        }
    }

    /// A record whose reputation is scored from the organisation name
    pub fn from_org(
        asn: &str,
        org_name: &str,
        country: &str,
        is_hosting: bool,
        is_vpn_provider: bool,
        ranges: &[&str],
    ) -> Self {
        let info = AsnInfo {
            asn: asn.to_string(),
            name: org_name.to_string(),
            country: country.to_string(),
            reputation_score: reputation_for_org(org_name, is_hosting, is_vpn_provider),
            is_hosting,
            is_vpn_provider,
        };
        Self::new(info, ranges)
    }
}

/// In-memory ASN directory
///
/// Stands in for live BGP/WHOIS sources; lookups match the most specific
/// announced prefix.
#[derive(Debug, Clone, Default)]
pub struct StaticAsnDirectory {
    records: Vec<AsnRecord>,
}

impl StaticAsnDirectory {
    pub fn new(records: Vec<AsnRecord>) -> Self {
        Self { records }
    }

    /// Well-known VPN, hosting and residential networks
    ///
    /// Hosting and VPN scores reflect observed proxy density; residential
    /// ISPs are scored from their name. ASNs without known prefixes are
    /// ranked but contribute no ranges.
    pub fn builtin() -> Self {
        Self::new(vec![
            // VPN operators
            AsnRecord::new(vpn("AS9009", "M247", "GB", 0.95), &[]),
            AsnRecord::new(vpn("AS212238", "DataCamp", "GB", 0.95), &[]),
            // Hosting
            AsnRecord::new(
                hosting("AS14061", "DigitalOcean", "US", 0.9),
                &["104.248.0.0/18", "159.65.0.0/16", "167.172.0.0/16", "178.128.0.0/16"],
            ),
            AsnRecord::new(
                hosting("AS20473", "Vultr", "US", 0.9),
                &["45.32.0.0/16", "45.76.0.0/16", "108.61.0.0/16"],
            ),
            AsnRecord::new(
                hosting("AS51167", "Contabo", "DE", 0.9),
                &["5.189.128.0/17", "173.212.192.0/18", "207.180.192.0/18"],
            ),
            AsnRecord::new(
                hosting("AS16276", "OVH", "FR", 0.85),
                &["51.15.0.0/16", "54.36.0.0/16", "91.121.0.0/16", "137.74.0.0/16"],
            ),
            AsnRecord::new(
                hosting("AS63949", "Linode", "US", 0.85),
                &["45.33.0.0/17", "139.162.0.0/16", "172.104.0.0/15"],
            ),
            AsnRecord::new(hosting("AS197540", "Neterra", "BG", 0.85), &[]),
            AsnRecord::new(
                hosting("AS16509", "Amazon Web Services", "US", 0.8),
                &["52.0.0.0/11", "54.0.0.0/8", "3.0.0.0/9", "18.0.0.0/9"],
            ),
            AsnRecord::new(
                hosting("AS24940", "Hetzner", "DE", 0.8),
                &["88.198.0.0/16", "78.46.0.0/15", "136.243.0.0/16"],
            ),
            AsnRecord::new(hosting("AS15169", "Google Cloud", "US", 0.7), &[]),
            AsnRecord::new(hosting("AS8075", "Microsoft Azure", "US", 0.7), &[]),
            // Residential
            AsnRecord::from_org("AS7922", "Comcast Cable", "US", false, false, &["73.0.0.0/8"]),
            AsnRecord::from_org("AS701", "Verizon Business", "US", false, false, &[]),
            AsnRecord::from_org("AS209", "CenturyLink", "US", false, false, &[]),
        ])
    }

    fn find(&self, ip: &IpAddr) -> Option<&AsnRecord> {
        self.records
            .iter()
            .flat_map(|record| {
                record
                    .ranges
                    .iter()
                    .filter(move |net| net.contains(ip))
                    .map(move |net| (net.prefix_len(), record))
            })
            .max_by_key(|(prefix_len, _)| *prefix_len)
            .map(|(_, record)| record)
    }
}

fn hosting(asn: &str, name: &str, country: &str, reputation_score: f64) -> AsnInfo {
    AsnInfo {
        asn: asn.to_string(),
        name: name.to_string(),
        country: country.to_string(),
        reputation_score,
        is_hosting: true,
        is_vpn_provider: false,
    }
}

fn vpn(asn: &str, name: &str, country: &str, reputation_score: f64) -> AsnInfo {
    AsnInfo {
        is_hosting: false,
        is_vpn_provider: true,
        ..hosting(asn, name, country, reputation_score)
    }
}

#[async_trait]
impl AsnReputation for StaticAsnDirectory {
    async fn lookup(&self, ip: &str) -> Option<AsnInfo> {
        let addr: IpAddr = ip.trim().parse().ok()?;
        let record = self.find(&addr);
        if record.is_none() {
            debug!("No ASN record for {}", ip);
        }
        record.map(|r| r.info.clone())
    }

    async fn high_value_ranges(&self, min_reputation: f64) -> Vec<ReputationRange> {
        let mut ranges: Vec<ReputationRange> = self
            .records
            .iter()
            .filter(|r| r.info.reputation_score >= min_reputation)
            .map(|r| ReputationRange {
                asn: r.info.asn.clone(),
                name: r.info.name.clone(),
                ranges: r.ranges.clone(),
                reputation: r.info.reputation_score,
                kind: NetworkKind::of(&r.info),
            })
            .collect();

        ranges.sort_by(|a, b| {
            b.reputation
                .partial_cmp(&a.reputation)
                .unwrap_or(Ordering::Equal)
        });
        ranges
    }
}
