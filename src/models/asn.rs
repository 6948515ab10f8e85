use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Autonomous system metadata used to rank candidate ranges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsnInfo {
    pub asn: String,
    pub name: String,
    pub country: String,
    /// 0.0 - 1.0, higher = more likely to host proxies
    pub reputation_score: f64,
    pub is_hosting: bool,
    pub is_vpn_provider: bool,
}

/// Kind of network behind a reputation range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Hosting,
    Vpn,
    Other,
}

impl NetworkKind {
    pub fn of(info: &AsnInfo) -> Self {
        if info.is_vpn_provider {
            NetworkKind::Vpn
        } else if info.is_hosting {
            NetworkKind::Hosting
        } else {
            NetworkKind::Other
        }
    }
}

/// Announced prefixes of one high-reputation ASN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationRange {
    pub asn: String,
    pub name: String,
    pub ranges: Vec<IpNet>,
    pub reputation: f64,
    pub kind: NetworkKind,
}
