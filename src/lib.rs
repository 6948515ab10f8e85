//! Scout - Ethical Proxy Discovery
//!
//! Finds open proxies by actively probing candidate endpoints.
//!
//! ## Features
//!
//! - SOCKS5, SOCKS4 and HTTP CONNECT detection with confidence scores
//! - Token bucket rate limiting and bounded scan concurrency
//! - Blocklist, per-IP hourly cap and restricted range enforcement
//! - Target generation from seed IPs and high-reputation ASN ranges
//! - Abuse contact lookup cached per subnet

pub mod asn;
pub mod config;
pub mod error;
pub mod models;
pub mod scanner;

pub use config::Config;
pub use error::{Result, ScoutError};
