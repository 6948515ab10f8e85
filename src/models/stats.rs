use serde::{Deserialize, Serialize};

/// Read-only view over the scan history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStatistics {
    pub total_scans: usize,
    pub scan_rate_per_minute: usize,
    pub active_ips: usize,
    pub blocklist_size: usize,
    pub cached_abuse_contacts: usize,
}

/// Coarse risk classification of a planned scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Planning estimate for a list of targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEstimate {
    pub total_targets: usize,
    pub estimated_duration_seconds: f64,
    pub estimated_bandwidth_mb: f64,
    pub risk_level: RiskLevel,
}
