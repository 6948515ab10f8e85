use crate::error::{Result, ScoutError};
use ipnet::IpNet;
use std::env;
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::time::Duration;

/// Restricted prefixes applied when `SCOUT_RESTRICTED_RANGES` is unset.
///
/// US DoD class-A allocations. Known to be incomplete; deployments should
/// supply their own list.
pub const DEFAULT_RESTRICTED_RANGES: &str =
    "11.0.0.0/8,21.0.0.0/8,22.0.0.0/8,26.0.0.0/8,28.0.0.0/8,29.0.0.0/8,30.0.0.0/8";

/// Scanner configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Admission control (concurrency, throughput, history)
    pub scanner: ScannerConfig,
    /// Protocol probe settings
    pub probe: ProbeConfig,
    /// Abuse-prevention policy
    pub policy: PolicyConfig,
    /// Target generation
    pub targets: TargetConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannerConfig {
    /// Maximum simultaneously in-flight target scans
    pub max_concurrent: usize,
    /// Token bucket refill rate (scans per second)
    pub requests_per_second: f64,
    /// Token bucket capacity; `None` means `requests_per_second * 2`
    pub burst: Option<f64>,
    /// Size of the scan log ring buffer
    pub history_capacity: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 50,
            requests_per_second: 10.0,
            burst: None,
            history_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    /// Timeout applied separately to connect, write and read
    pub timeout: Duration,
    /// Destination requested in the SOCKS4 CONNECT probe
    pub socks4_destination: SocketAddrV4,
    /// Host requested in the HTTP CONNECT probe
    pub http_connect_host: String,
    /// Port requested in the HTTP CONNECT probe
    pub http_connect_port: u16,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            socks4_destination: SocketAddrV4::new([8, 8, 8, 8].into(), 53),
            http_connect_host: "www.google.com".to_string(),
            http_connect_port: 443,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    /// Newline-delimited IP blocklist; a missing file means an empty list
    pub blocklist_path: Option<PathBuf>,
    /// Prefixes that must never be scanned
    pub restricted_ranges: Vec<IpNet>,
    /// Cap on scans of one IP inside `scan_window`
    pub max_scans_per_ip: usize,
    /// Trailing window for the per-IP cap
    pub scan_window: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            blocklist_path: None,
            restricted_ranges: parse_ranges(DEFAULT_RESTRICTED_RANGES).unwrap_or_default(),
            max_scans_per_ip: 10,
            scan_window: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetConfig {
    /// Seed IPs probed on every common proxy port
    pub seed_ips: Vec<String>,
    /// Upper bound on generated targets
    pub max_targets: usize,
    /// How many reputation ranges are sampled
    pub ranges_per_scan: usize,
    /// Random hosts sampled from each range
    pub hosts_per_range: usize,
    /// Number of leading common ports probed on sampled hosts
    pub range_port_count: usize,
    /// Minimum ASN reputation for a range to be sampled
    pub min_reputation: f64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            seed_ips: Vec::new(),
            max_targets: 1000,
            ranges_per_scan: 3,
            hosts_per_range: 10,
            range_port_count: 5,
            min_reputation: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let requests_per_second: f64 = parse_env("SCOUT_RATE_PER_SECOND", "10")?;
        if !(requests_per_second > 0.0 && requests_per_second.is_finite()) {
            return Err(ScoutError::InvalidConfig(
                "SCOUT_RATE_PER_SECOND must be a positive number".into(),
            ));
        }

        let burst = match env::var("SCOUT_RATE_BURST") {
            Ok(raw) if !raw.trim().is_empty() => {
                let burst: f64 = raw.trim().parse().map_err(|_| {
                    ScoutError::InvalidConfig("SCOUT_RATE_BURST must be a number".into())
                })?;
                if burst < 1.0 {
                    return Err(ScoutError::InvalidConfig(
                        "SCOUT_RATE_BURST must be at least 1".into(),
                    ));
                }
                Some(burst)
            }
            _ => None,
        };

        let max_concurrent: usize = parse_env("SCOUT_MAX_CONCURRENT", "50")?;
        if max_concurrent == 0 {
            return Err(ScoutError::InvalidConfig(
                "SCOUT_MAX_CONCURRENT must be greater than zero".into(),
            ));
        }

        let timeout_ms: u64 = parse_env("SCOUT_PROBE_TIMEOUT_MS", "5000")?;
        let socks4_destination: SocketAddrV4 =
            get_env_or("SCOUT_SOCKS4_PROBE_DEST", "8.8.8.8:53")
                .parse()
                .map_err(|_| {
                    ScoutError::InvalidConfig(
                        "SCOUT_SOCKS4_PROBE_DEST must be an IPv4 socket address".into(),
                    )
                })?;

        let blocklist_path = get_env_or("SCOUT_BLOCKLIST_PATH", "blocklist.txt");
        let blocklist_path = if blocklist_path.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(blocklist_path.trim()))
        };

        Ok(Config {
            scanner: ScannerConfig {
                max_concurrent,
                requests_per_second,
                burst,
                history_capacity: parse_env("SCOUT_HISTORY_CAPACITY", "10000")?,
            },
            probe: ProbeConfig {
                timeout: Duration::from_millis(timeout_ms.max(1)),
                socks4_destination,
                http_connect_host: get_env_or("SCOUT_HTTP_PROBE_HOST", "www.google.com"),
                http_connect_port: 443,
            },
            policy: PolicyConfig {
                blocklist_path,
                restricted_ranges: parse_ranges(&get_env_or(
                    "SCOUT_RESTRICTED_RANGES",
                    DEFAULT_RESTRICTED_RANGES,
                ))?,
                max_scans_per_ip: parse_env("SCOUT_MAX_SCANS_PER_IP_PER_HOUR", "10")?,
                scan_window: Duration::from_secs(60 * 60),
            },
            targets: TargetConfig {
                seed_ips: split_list(&get_env_or("SCOUT_SEED_IPS", "")),
                max_targets: parse_env("SCOUT_MAX_TARGETS", "1000")?,
                ranges_per_scan: parse_env("SCOUT_RANGES_PER_SCAN", "3")?,
                hosts_per_range: parse_env("SCOUT_HOSTS_PER_RANGE", "10")?,
                range_port_count: parse_env("SCOUT_RANGE_PORT_COUNT", "5")?,
                min_reputation: parse_env("SCOUT_MIN_REPUTATION", "0.7")?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }
}

/// Parse a comma-separated list of CIDR prefixes
pub fn parse_ranges(raw: &str) -> Result<Vec<IpNet>> {
    split_list(raw)
        .into_iter()
        .map(|s| {
            s.parse::<IpNet>()
                .map(|net| net.trunc())
                .map_err(|e| ScoutError::InvalidConfig(format!("invalid CIDR '{}': {}", s, e)))
        })
        .collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| ScoutError::InvalidConfig(format!("{} must be a valid number", key)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
