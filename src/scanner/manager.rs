//! Ethical scan orchestration
//!
//! Every target passes the policy gate (blocklist, per-IP hourly cap,
//! restricted ranges), then the concurrency semaphore, then the shared
//! rate limiter, before the protocol detector ever opens a socket.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Config, PolicyConfig, ScannerConfig};
use crate::error::{Result, ScoutError};
use crate::models::{ScanResult, ScanStatistics, ScanTarget};
use crate::scanner::abuse::{AbuseContactCache, AbuseContactLookup, StaticAbuseContact};
use crate::scanner::detector::ProtocolDetector;
use crate::scanner::policy::{Blocklist, PrefixRangePolicy, RangePolicy};
use crate::scanner::rate_limit::RateLimiter;

const RESULT_CHANNEL_CAPACITY: usize = 1024;

/// Outcome of the policy gate for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDecision {
    Allowed,
    Blocked,
    RateCapped,
    Restricted,
    /// `ip` is not an IP literal; names are never resolved at the gate
    NotAnAddress,
}

impl ScanDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanDecision::Allowed => "allowed",
            ScanDecision::Blocked => "blocklisted",
            ScanDecision::RateCapped => "per-IP scan cap reached",
            ScanDecision::Restricted => "restricted range",
            ScanDecision::NotAnAddress => "not an IP address",
        }
    }
}

impl std::fmt::Display for ScanDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded scan attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanLogEntry {
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub port: u16,
}

/// Scan log ring buffer plus per-IP timestamps
#[derive(Debug)]
struct ScanLedger {
    log: VecDeque<ScanLogEntry>,
    capacity: usize,
    per_ip: HashMap<String, Vec<DateTime<Utc>>>,
}

impl ScanLedger {
    fn new(capacity: usize) -> Self {
        Self {
            log: VecDeque::new(),
            capacity,
            per_ip: HashMap::new(),
        }
    }

    fn recent_count(&self, ip: &str, now: DateTime<Utc>, window: TimeDelta) -> usize {
        self.per_ip
            .get(ip)
            .map(|history| history.iter().filter(|&&t| now - t < window).count())
            .unwrap_or(0)
    }

    /// Record a scan unless `ip` already reached `cap` inside `window`
    fn try_record(
        &mut self,
        ip: &str,
        port: u16,
        now: DateTime<Utc>,
        cap: usize,
        window: TimeDelta,
    ) -> bool {
        if self.per_ip.len() > self.capacity {
            self.per_ip
                .retain(|_, history| history.last().is_some_and(|&t| now - t < window));
        }

        let history = self.per_ip.entry(ip.to_string()).or_default();
        history.retain(|&t| now - t < window);
        if history.len() >= cap {
            return false;
        }
        history.push(now);

        if self.capacity > 0 {
            if self.log.len() >= self.capacity {
                self.log.pop_front();
            }
            self.log.push_back(ScanLogEntry {
                timestamp: now,
                ip: ip.to_string(),
                port,
            });
        }
        true
    }

    /// `(total_scans, scans_in_last_minute, distinct_ips)`
    fn summary(&self, now: DateTime<Utc>) -> (usize, usize, usize) {
        let minute = TimeDelta::minutes(1);
        let recent = self
            .log
            .iter()
            .filter(|entry| now - entry.timestamp < minute)
            .count();
        let ips: HashSet<&str> = self.log.iter().map(|entry| entry.ip.as_str()).collect();
        (self.log.len(), recent, ips.len())
    }
}

struct ManagerInner {
    detector: ProtocolDetector,
    semaphore: Semaphore,
    max_concurrent: usize,
    rate_limiter: RateLimiter,
    blocklist: Blocklist,
    range_policy: Arc<dyn RangePolicy>,
    abuse_contacts: AbuseContactCache,
    ledger: Mutex<ScanLedger>,
    max_scans_per_ip: usize,
    scan_window: TimeDelta,
    results: broadcast::Sender<ScanResult>,
}

/// Policy and concurrency gate around `ProtocolDetector`
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct EthicalScanManager {
    inner: Arc<ManagerInner>,
}

/// Builder for `EthicalScanManager`
pub struct ManagerBuilder {
    scanner: ScannerConfig,
    policy: PolicyConfig,
    detector: Option<ProtocolDetector>,
    blocklist: Option<Blocklist>,
    range_policy: Option<Arc<dyn RangePolicy>>,
    abuse_lookup: Option<Arc<dyn AbuseContactLookup>>,
}

impl ManagerBuilder {
    pub fn detector(mut self, detector: ProtocolDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Use this blocklist instead of loading `PolicyConfig::blocklist_path`
    pub fn blocklist(mut self, blocklist: Blocklist) -> Self {
        self.blocklist = Some(blocklist);
        self
    }

    /// Override the prefix-based restricted range check
    pub fn range_policy(mut self, policy: Arc<dyn RangePolicy>) -> Self {
        self.range_policy = Some(policy);
        self
    }

    pub fn abuse_lookup(mut self, lookup: Arc<dyn AbuseContactLookup>) -> Self {
        self.abuse_lookup = Some(lookup);
        self
    }

    /// Build the manager, loading the blocklist file if one is configured
    ///
    /// A missing blocklist file is fine; an unreadable or corrupt one is
    /// an error.
    pub async fn build(self) -> Result<EthicalScanManager> {
        if self.scanner.max_concurrent == 0 {
            return Err(ScoutError::InvalidConfig(
                "max_concurrent must be greater than zero".into(),
            ));
        }

        let blocklist = match (self.blocklist, &self.policy.blocklist_path) {
            (Some(blocklist), _) => blocklist,
            (None, Some(path)) => Blocklist::load(path).await?,
            (None, None) => Blocklist::new(),
        };

        let range_policy = self.range_policy.unwrap_or_else(|| {
            Arc::new(PrefixRangePolicy::new(self.policy.restricted_ranges.clone()))
        });
        let abuse_lookup = self
            .abuse_lookup
            .unwrap_or_else(|| Arc::new(StaticAbuseContact::default()));
        let scan_window =
            TimeDelta::from_std(self.policy.scan_window).unwrap_or_else(|_| TimeDelta::hours(1));
        let detector = self.detector.unwrap_or_default();
        let abuse_contacts = AbuseContactCache::new(abuse_lookup, detector.config().timeout);
        let rate_limiter = RateLimiter::from_config(&self.scanner);
        let (results, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);

        info!(
            "Scan manager ready: {} concurrent, {}/s (burst {}), {} blocklisted, {} ranges",
            self.scanner.max_concurrent,
            rate_limiter.rate(),
            rate_limiter.burst(),
            blocklist.len(),
            range_policy.name()
        );

        Ok(EthicalScanManager {
            inner: Arc::new(ManagerInner {
                detector,
                semaphore: Semaphore::new(self.scanner.max_concurrent),
                max_concurrent: self.scanner.max_concurrent,
                rate_limiter,
                blocklist,
                range_policy,
                abuse_contacts,
                ledger: Mutex::new(ScanLedger::new(self.scanner.history_capacity)),
                max_scans_per_ip: self.policy.max_scans_per_ip,
                scan_window,
                results,
            }),
        })
    }
}

impl EthicalScanManager {
    pub fn builder(scanner: ScannerConfig, policy: PolicyConfig) -> ManagerBuilder {
        ManagerBuilder {
            scanner,
            policy,
            detector: None,
            blocklist: None,
            range_policy: None,
            abuse_lookup: None,
        }
    }

    /// Build a manager from the full application configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::builder(config.scanner.clone(), config.policy.clone())
            .detector(ProtocolDetector::new(config.probe.clone()))
            .build()
            .await
    }

    /// Evaluate the policy gate without recording anything
    pub fn check_policy(&self, target: &ScanTarget) -> ScanDecision {
        match self.admit(target) {
            Ok(_) => ScanDecision::Allowed,
            Err(decision) => decision,
        }
    }

    /// Policy checks on the canonical address; every rule sees the same
    /// address that will be probed.
    fn admit(&self, target: &ScanTarget) -> std::result::Result<IpAddr, ScanDecision> {
        let inner = &self.inner;
        let addr = target.ip_addr().ok_or(ScanDecision::NotAnAddress)?;
        let ip = addr.to_string();

        if inner.blocklist.contains(&ip) {
            return Err(ScanDecision::Blocked);
        }

        let recent = inner
            .ledger
            .lock()
            .recent_count(&ip, Utc::now(), inner.scan_window);
        if recent >= inner.max_scans_per_ip {
            return Err(ScanDecision::RateCapped);
        }

        if inner.range_policy.is_restricted(&addr) {
            return Err(ScanDecision::Restricted);
        }

        Ok(addr)
    }

    /// Whether `target` may be scanned right now
    pub fn is_scan_allowed(&self, target: &ScanTarget) -> bool {
        self.check_policy(target) == ScanDecision::Allowed
    }

    /// Scan one target, or return `None` if policy drops it
    ///
    /// The concurrency permit is held for the whole detection and released
    /// on every exit path, including cancellation.
    #[instrument(skip(self, target), fields(target = %target))]
    pub async fn scan_target(&self, target: &ScanTarget) -> Option<ScanResult> {
        let addr = match self.admit(target) {
            Ok(addr) => addr,
            Err(decision) => {
                warn!("Skipping {}: {}", target, decision);
                return None;
            }
        };

        let Ok(_permit) = self.inner.semaphore.acquire().await else {
            debug!("Scan manager closed, dropping {}", target);
            return None;
        };
        self.inner.rate_limiter.acquire().await;

        // Concurrent scans of one IP may all pass the pre-check above, so
        // the cap is enforced again atomically with the bookkeeping.
        if !self.record_scan(addr, target.port) {
            warn!("Skipping {}: {}", target, ScanDecision::RateCapped);
            return None;
        }

        let abuse_contact = self.inner.abuse_contacts.contact_for(&addr).await;

        let mut result = self
            .inner
            .detector
            .detect_proxy(&addr.to_string(), target.port)
            .await;

        result
            .metadata
            .insert("source".to_string(), target.source.as_str().to_string());
        if let Some(contact) = abuse_contact {
            result.metadata.insert("abuse_contact".to_string(), contact);
        }

        // No subscribers is not an error.
        let _ = self.inner.results.send(result.clone());
        Some(result)
    }

    fn record_scan(&self, addr: IpAddr, port: u16) -> bool {
        let inner = &self.inner;
        inner.ledger.lock().try_record(
            &addr.to_string(),
            port,
            Utc::now(),
            inner.max_scans_per_ip,
            inner.scan_window,
        )
    }

    /// Scan all targets concurrently; dropped targets produce no entry
    pub async fn scan_batch(&self, targets: Vec<ScanTarget>) -> Vec<ScanResult> {
        self.scan_batch_with_cancel(targets, CancellationToken::new())
            .await
    }

    /// As `scan_batch`, stopping every outstanding target once `cancel`
    /// fires. Results completed before cancellation are still returned.
    pub async fn scan_batch_with_cancel(
        &self,
        targets: impl IntoIterator<Item = ScanTarget>,
        cancel: CancellationToken,
    ) -> Vec<ScanResult> {
        let mut set = JoinSet::new();

        for target in targets {
            if cancel.is_cancelled() {
                break;
            }
            let manager = self.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = manager.scan_target(&target) => result,
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => error!("Scan task failed: {}", e),
            }
        }

        if cancel.is_cancelled() {
            info!("Scan batch cancelled after {} result(s)", results.len());
        }
        results
    }

    /// Read-only statistics over the scan log
    pub fn get_scan_statistics(&self) -> ScanStatistics {
        let (total_scans, scan_rate_per_minute, active_ips) =
            self.inner.ledger.lock().summary(Utc::now());

        ScanStatistics {
            total_scans,
            scan_rate_per_minute,
            active_ips,
            blocklist_size: self.inner.blocklist.len(),
            cached_abuse_contacts: self.inner.abuse_contacts.len(),
        }
    }

    /// Snapshot of the scan log, oldest first
    pub fn scan_history(&self) -> Vec<ScanLogEntry> {
        self.inner.ledger.lock().log.iter().cloned().collect()
    }

    /// Add an IP to the blocklist for the rest of the run
    pub fn block_ip(&self, ip: &str) -> bool {
        self.inner.blocklist.insert(ip)
    }

    /// Receive every completed `ScanResult`
    pub fn subscribe(&self) -> broadcast::Receiver<ScanResult> {
        self.inner.results.subscribe()
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Concurrency permits not currently held by a scan
    pub fn available_permits(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Refuse all further scans; in-flight scans finish normally
    pub fn close(&self) {
        self.inner.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;
    use crate::models::{ProxyType, TargetSource};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    fn scanner_config(max_concurrent: usize) -> ScannerConfig {
        ScannerConfig {
            max_concurrent,
            requests_per_second: 1000.0,
            burst: Some(1000.0),
            history_capacity: 10_000,
        }
    }

    fn policy_config() -> PolicyConfig {
        PolicyConfig {
            blocklist_path: None,
            ..PolicyConfig::default()
        }
    }

    fn detector(timeout: Duration) -> ProtocolDetector {
        ProtocolDetector::new(ProbeConfig {
            timeout,
            ..ProbeConfig::default()
        })
    }

    async fn manager(max_concurrent: usize, blocklist: &[&str]) -> EthicalScanManager {
        EthicalScanManager::builder(scanner_config(max_concurrent), policy_config())
            .detector(detector(Duration::from_millis(300)))
            .blocklist(blocklist.iter().collect())
            .build()
            .await
            .unwrap()
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Accepts connections and never answers.
    async fn silent_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        addr
    }

    /// Answers the SOCKS5 greeting with "no authentication".
    async fn socks5_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    if let Ok(n) = stream.read(&mut buf).await {
                        if n >= 3 && buf[0] == 0x05 {
                            let _ = stream.write_all(&[0x05, 0x00]).await;
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                });
            }
        });
        addr
    }

    #[test]
    fn test_ledger_caps_per_ip_inside_window() {
        let mut ledger = ScanLedger::new(100);
        let window = TimeDelta::hours(1);
        let start = Utc::now();

        for i in 0..10 {
            assert!(ledger.try_record("192.0.2.1", 1080 + i, start, 10, window));
        }
        assert!(!ledger.try_record("192.0.2.1", 3128, start, 10, window));
        assert!(ledger.try_record("192.0.2.2", 3128, start, 10, window));
        assert_eq!(ledger.recent_count("192.0.2.1", start, window), 10);

        // Entries older than the window stop counting and are pruned.
        let later = start + TimeDelta::minutes(61);
        assert_eq!(ledger.recent_count("192.0.2.1", later, window), 0);
        assert!(ledger.try_record("192.0.2.1", 3128, later, 10, window));
        assert_eq!(ledger.per_ip["192.0.2.1"].len(), 1);
    }

    #[test]
    fn test_ledger_log_is_bounded() {
        let mut ledger = ScanLedger::new(3);
        let now = Utc::now();
        for i in 0..5u8 {
            assert!(ledger.try_record(&format!("192.0.2.{}", i), 80, now, 10, TimeDelta::hours(1)));
        }

        let (total, recent, ips) = ledger.summary(now);
        assert_eq!(total, 3);
        assert_eq!(recent, 3);
        assert_eq!(ips, 3);
        assert_eq!(ledger.log.front().unwrap().ip, "192.0.2.2");
    }

    #[tokio::test]
    async fn test_is_scan_allowed_blocklist() {
        let manager = manager(4, &["192.0.2.66"]).await;

        assert!(!manager.is_scan_allowed(&ScanTarget::new("192.0.2.66", 1080)));
        assert!(manager.is_scan_allowed(&ScanTarget::new("192.0.2.67", 1080)));

        assert!(manager.block_ip("192.0.2.67"));
        assert_eq!(
            manager.check_policy(&ScanTarget::new("192.0.2.67", 1080)),
            ScanDecision::Blocked
        );
    }

    #[tokio::test]
    async fn test_restricted_ranges_are_skipped() {
        let manager = manager(4, &[]).await;

        assert_eq!(
            manager.check_policy(&ScanTarget::new("11.1.2.3", 8080)),
            ScanDecision::Restricted
        );
        assert!(manager.scan_target(&ScanTarget::new("11.1.2.3", 8080)).await.is_none());
        assert_eq!(manager.get_scan_statistics().total_scans, 0);
    }

    #[tokio::test]
    async fn test_custom_range_policy() {
        struct DenyAll;
        impl RangePolicy for DenyAll {
            fn is_restricted(&self, _ip: &std::net::IpAddr) -> bool {
                true
            }
            fn name(&self) -> &'static str {
                "deny-all"
            }
        }

        let manager = EthicalScanManager::builder(scanner_config(1), policy_config())
            .range_policy(Arc::new(DenyAll))
            .build()
            .await
            .unwrap();
        assert!(!manager.is_scan_allowed(&ScanTarget::new("192.0.2.1", 80)));
    }

    #[tokio::test]
    async fn test_eleventh_scan_within_hour_is_dropped() {
        let manager = manager(4, &[]).await;
        let port = closed_port().await;

        for attempt in 0..10 {
            let target = ScanTarget::new("127.0.0.1", port);
            assert!(manager.is_scan_allowed(&target), "attempt {}", attempt);
            let result = manager.scan_target(&target).await.unwrap();
            assert!(!result.is_proxy);
        }

        let eleventh = ScanTarget::new("127.0.0.1", port.wrapping_add(1));
        assert!(!manager.is_scan_allowed(&eleventh));
        assert_eq!(manager.check_policy(&eleventh), ScanDecision::RateCapped);
        assert!(manager.scan_target(&eleventh).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_batch_cannot_overshoot_cap() {
        let manager = manager(50, &[]).await;
        let port = closed_port().await;

        let targets = vec![ScanTarget::new("127.0.0.1", port); 25];
        let results = manager.scan_batch(targets).await;

        assert_eq!(results.len(), 10);
        assert_eq!(manager.get_scan_statistics().total_scans, 10);
    }

    #[tokio::test]
    async fn test_scan_batch_returns_only_allowed_targets() {
        let manager = manager(8, &["192.0.2.1"]).await;
        let mut results_rx = manager.subscribe();
        let port = closed_port().await;

        let targets = vec![
            ScanTarget::new("192.0.2.1", 1080),
            ScanTarget::new("11.0.0.1", 1080),
            ScanTarget::new("127.0.0.1", port),
            ScanTarget::new("127.0.0.1", port).with_source(TargetSource::Seed),
        ];

        let results = manager.scan_batch(targets).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_proxy && r.confidence == 0.0));
        assert!(results.iter().all(|r| {
            r.metadata.get("abuse_contact").map(String::as_str) == Some("abuse@example.com")
        }));

        // Only allowed targets reach subscribers.
        let mut published = 0;
        while results_rx.try_recv().is_ok() {
            published += 1;
        }
        assert_eq!(published, 2);

        let history = manager.scan_history();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|entry| entry.ip == "127.0.0.1" && entry.port == port));

        let stats = manager.get_scan_statistics();
        assert_eq!(stats.total_scans, 2);
        assert_eq!(stats.scan_rate_per_minute, 2);
        assert_eq!(stats.active_ips, 1);
        assert_eq!(stats.blocklist_size, 1);
        assert_eq!(stats.cached_abuse_contacts, 1);
    }

    #[tokio::test]
    async fn test_scan_target_detects_socks5() {
        let manager = manager(4, &[]).await;
        let addr = socks5_server().await;

        let result = manager
            .scan_target(&ScanTarget::new(addr.ip().to_string(), addr.port()))
            .await
            .unwrap();

        assert!(result.is_proxy);
        assert_eq!(result.proxy_type, Some(ProxyType::Socks5));
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.metadata["source"], "manual");
    }

    #[tokio::test]
    async fn test_semaphore_bounds_concurrency() {
        let manager = manager(2, &[]).await;
        let addr = silent_server().await;

        let targets = vec![ScanTarget::new(addr.ip().to_string(), addr.port()); 4];
        let start = Instant::now();
        let results = manager.scan_batch(targets).await;

        assert_eq!(results.len(), 4);
        // Each scan waits out a 300ms read timeout; two run at a time.
        assert!(start.elapsed() >= Duration::from_millis(550));
        assert_eq!(manager.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_releases_permits() {
        let manager = EthicalScanManager::builder(scanner_config(2), policy_config())
            .detector(detector(Duration::from_secs(5)))
            .build()
            .await
            .unwrap();
        let addr = silent_server().await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let targets = vec![ScanTarget::new(addr.ip().to_string(), addr.port()); 6];
        let start = Instant::now();
        let results = manager.scan_batch_with_cancel(targets, cancel).await;

        assert!(results.is_empty());
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(manager.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_closed_manager_drops_targets() {
        let manager = manager(2, &[]).await;
        manager.close();

        let port = closed_port().await;
        assert!(manager
            .scan_target(&ScanTarget::new("127.0.0.1", port))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_corrupt_blocklist_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocklist.txt");
        std::fs::write(&path, "192.0.2.1\n300.1.1.1\n").unwrap();

        let policy = PolicyConfig {
            blocklist_path: Some(path),
            ..PolicyConfig::default()
        };
        let err = EthicalScanManager::builder(scanner_config(1), policy)
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ScoutError::Blocklist { line: 2, .. }));
    }

    #[tokio::test]
    async fn test_missing_blocklist_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let policy = PolicyConfig {
            blocklist_path: Some(dir.path().join("absent.txt")),
            ..PolicyConfig::default()
        };
        let manager = EthicalScanManager::builder(scanner_config(1), policy)
            .build()
            .await
            .unwrap();
        assert_eq!(manager.get_scan_statistics().blocklist_size, 0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected() {
        let err = EthicalScanManager::builder(scanner_config(0), policy_config())
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ScoutError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_hostname_cannot_bypass_blocklist() {
        let manager = manager(4, &["127.0.0.1"]).await;
        let addr = socks5_server().await;

        let by_name = ScanTarget::new("localhost", addr.port());
        assert!(!manager.is_scan_allowed(&by_name));
        assert_eq!(manager.check_policy(&by_name), ScanDecision::NotAnAddress);
        assert!(manager.scan_target(&by_name).await.is_none());

        let mapped = ScanTarget::new("::ffff:127.0.0.1", addr.port());
        assert_eq!(manager.check_policy(&mapped), ScanDecision::Blocked);
        assert!(manager.scan_target(&mapped).await.is_none());
        assert_eq!(manager.get_scan_statistics().total_scans, 0);
    }

    #[tokio::test]
    async fn test_hostname_cannot_bypass_restricted_range() {
        let policy = PolicyConfig {
            restricted_ranges: vec!["127.0.0.0/8".parse().unwrap()],
            ..policy_config()
        };
        let manager = EthicalScanManager::builder(scanner_config(4), policy)
            .detector(detector(Duration::from_millis(300)))
            .build()
            .await
            .unwrap();
        let addr = socks5_server().await;

        for ip in ["localhost", "127.0.0.1", "::ffff:127.0.0.1"] {
            let target = ScanTarget::new(ip, addr.port());
            assert!(!manager.is_scan_allowed(&target), "{} was allowed", ip);
            assert!(manager.scan_target(&target).await.is_none());
        }
    }

    #[tokio::test]
    async fn test_mapped_address_shares_per_ip_cap() {
        let manager = manager(4, &[]).await;
        let port = closed_port().await;

        for _ in 0..10 {
            let target = ScanTarget::new("::ffff:127.0.0.1", port);
            assert!(manager.scan_target(&target).await.is_some());
        }

        let plain = ScanTarget::new("127.0.0.1", port);
        assert_eq!(manager.check_policy(&plain), ScanDecision::RateCapped);
        assert!(manager
            .scan_history()
            .iter()
            .all(|entry| entry.ip == "127.0.0.1"));
    }

    #[tokio::test]
    async fn test_stuck_abuse_lookup_does_not_hold_permit() {
        struct StuckLookup;

        #[async_trait::async_trait]
        impl AbuseContactLookup for StuckLookup {
            async fn lookup(&self, _subnet: &ipnet::IpNet) -> Option<String> {
                std::future::pending().await
            }
        }

        let manager = EthicalScanManager::builder(scanner_config(1), policy_config())
            .detector(detector(Duration::from_millis(300)))
            .abuse_lookup(Arc::new(StuckLookup))
            .build()
            .await
            .unwrap();
        let port = closed_port().await;

        let result = tokio::time::timeout(
            Duration::from_secs(3),
            manager.scan_target(&ScanTarget::new("127.0.0.1", port)),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(!result.metadata.contains_key("abuse_contact"));
        assert_eq!(manager.available_permits(), 1);
        assert_eq!(manager.get_scan_statistics().cached_abuse_contacts, 0);
    }

    #[tokio::test]
    async fn test_panicking_target_does_not_fail_batch() {
        struct PanicsOn(std::net::IpAddr);

        impl RangePolicy for PanicsOn {
            fn is_restricted(&self, ip: &std::net::IpAddr) -> bool {
                if *ip == self.0 {
                    panic!("range data unavailable for {}", ip);
                }
                false
            }
            fn name(&self) -> &'static str {
                "panics-on"
            }
        }

        let manager = EthicalScanManager::builder(scanner_config(4), policy_config())
            .detector(detector(Duration::from_millis(300)))
            .range_policy(Arc::new(PanicsOn("192.0.2.99".parse().unwrap())))
            .build()
            .await
            .unwrap();
        let port = closed_port().await;

        let targets = vec![
            ScanTarget::new("127.0.0.1", port),
            ScanTarget::new("192.0.2.99", 1080),
            ScanTarget::new("127.0.0.1", port),
        ];
        let results = manager.scan_batch(targets).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.ip == "127.0.0.1"));
        assert_eq!(manager.available_permits(), 4);
    }
}
