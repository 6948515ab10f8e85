use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proxy protocol spoken by a detected target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Socks5,
    Socks4,
    Http,
}

impl ProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Socks5 => "socks5",
            ProxyType::Socks4 => "socks4",
            ProxyType::Http => "http",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "socks5" => Some(ProxyType::Socks5),
            "socks4" => Some(ProxyType::Socks4),
            "http" => Some(ProxyType::Http),
            _ => None,
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyType::Socks4 | ProxyType::Socks5)
    }
}

impl std::fmt::Display for ProxyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a probe could not talk to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    Timeout,
    Refused,
    Reset,
    Unreachable,
    Other,
}

impl NetworkErrorKind {
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => NetworkErrorKind::Timeout,
            io::ErrorKind::ConnectionRefused => NetworkErrorKind::Refused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => NetworkErrorKind::Reset,
            io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::AddrNotAvailable => NetworkErrorKind::Unreachable,
            _ => NetworkErrorKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkErrorKind::Timeout => "timeout",
            NetworkErrorKind::Refused => "refused",
            NetworkErrorKind::Reset => "reset",
            NetworkErrorKind::Unreachable => "unreachable",
            NetworkErrorKind::Other => "network_error",
        }
    }
}

/// Result of a single protocol probe against one target
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    /// The handshake matched, with a confidence in `[0, 1]`
    Detected(f64),
    /// A response arrived but it was not this protocol, or nothing arrived
    NotDetected,
    NetworkError(NetworkErrorKind),
}

impl ProbeOutcome {
    pub fn is_detected(&self) -> bool {
        matches!(self, ProbeOutcome::Detected(_))
    }

    pub fn confidence(&self) -> f64 {
        match self {
            ProbeOutcome::Detected(c) => *c,
            _ => 0.0,
        }
    }

    /// `(is_detected, confidence)` view of the outcome
    pub fn as_pair(&self) -> (bool, f64) {
        (self.is_detected(), self.confidence())
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Detected(_) => "detected",
            ProbeOutcome::NotDetected => "not_detected",
            ProbeOutcome::NetworkError(kind) => kind.as_str(),
        }
    }
}

/// Terminal result of scanning one target
///
/// `is_proxy = false` with `confidence = 0.0` is a normal outcome. `error`
/// is only set when something unexpected happened (e.g. the target address
/// could not be resolved).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub ip: String,
    pub port: u16,
    pub is_proxy: bool,
    pub proxy_type: Option<ProxyType>,
    pub response_time: Duration,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ScanResult {
    pub fn detected(
        ip: impl Into<String>,
        port: u16,
        proxy_type: ProxyType,
        confidence: f64,
        response_time: Duration,
    ) -> Self {
        Self {
            ip: ip.into(),
            port,
            is_proxy: true,
            proxy_type: Some(proxy_type),
            response_time,
            confidence: confidence.clamp(0.0, 1.0),
            error: None,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn not_detected(ip: impl Into<String>, port: u16, response_time: Duration) -> Self {
        Self {
            ip: ip.into(),
            port,
            is_proxy: false,
            proxy_type: None,
            response_time,
            confidence: 0.0,
            error: None,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn failed(
        ip: impl Into<String>,
        port: u16,
        response_time: Duration,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::not_detected(ip, port, response_time);
        result.error = Some(error.into());
        result
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_type_parsing() {
        assert_eq!(ProxyType::from_str("SOCKS5"), Some(ProxyType::Socks5));
        assert_eq!(ProxyType::from_str("http"), Some(ProxyType::Http));
        assert_eq!(ProxyType::from_str("socks4a"), None);

        assert!(ProxyType::Socks4.is_socks());
        assert!(!ProxyType::Http.is_socks());
        assert_eq!(ProxyType::Socks4.to_string(), "socks4");
    }

    #[test]
    fn test_network_error_kind_from_io() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
        let other = io::Error::other("weird");

        assert_eq!(NetworkErrorKind::from_io(&refused), NetworkErrorKind::Refused);
        assert_eq!(NetworkErrorKind::from_io(&reset), NetworkErrorKind::Reset);
        assert_eq!(NetworkErrorKind::from_io(&eof), NetworkErrorKind::Reset);
        assert_eq!(NetworkErrorKind::from_io(&other), NetworkErrorKind::Other);
    }

    #[test]
    fn test_probe_outcome_views() {
        assert_eq!(ProbeOutcome::Detected(0.9).as_pair(), (true, 0.9));
        assert_eq!(ProbeOutcome::NotDetected.as_pair(), (false, 0.0));
        assert_eq!(
            ProbeOutcome::NetworkError(NetworkErrorKind::Timeout).as_pair(),
            (false, 0.0)
        );
        assert_eq!(
            ProbeOutcome::NetworkError(NetworkErrorKind::Refused).label(),
            "refused"
        );
    }

    #[test]
    fn test_failed_result_is_not_a_proxy() {
        let result = ScanResult::failed("bad-host", 1080, Duration::ZERO, "lookup failed");
        assert!(!result.is_proxy);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.proxy_type, None);
        assert_eq!(result.error.as_deref(), Some("lookup failed"));
    }

    #[test]
    fn test_result_serializes_lowercase_type() {
        let result = ScanResult::detected("1.2.3.4", 1080, ProxyType::Socks5, 1.0, Duration::ZERO)
            .with_metadata("socks5", "detected");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["proxy_type"], "socks5");
        assert_eq!(json["metadata"]["socks5"], "detected");
        assert!(json.get("error").is_none());
    }
}
