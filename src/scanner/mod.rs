//! Active scanning: protocol probes, admission control, target generation

pub mod abuse;
pub mod detector;
pub mod manager;
pub mod policy;
pub mod rate_limit;
pub mod targets;

pub use abuse::{AbuseContactCache, AbuseContactLookup, StaticAbuseContact};
pub use detector::ProtocolDetector;
pub use manager::{EthicalScanManager, ManagerBuilder, ScanDecision, ScanLogEntry};
pub use policy::{Blocklist, PrefixRangePolicy, RangePolicy};
pub use rate_limit::RateLimiter;
pub use targets::{TargetIter, TargetSelector, COMMON_PROXY_PORTS};
