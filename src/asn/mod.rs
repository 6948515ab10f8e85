//! ASN reputation collaborator
//!
//! Ranks address ranges by how likely they are to host open proxies.
//! Detection never depends on it; it only orders what gets scanned.

mod directory;
mod reputation;

pub use directory::{AsnRecord, StaticAsnDirectory};
pub use reputation::reputation_for_org;

use async_trait::async_trait;

use crate::models::{AsnInfo, ReputationRange};

/// Lookup interface for ASN metadata
#[async_trait]
pub trait AsnReputation: Send + Sync {
    /// ASN information for one address, if known
    async fn lookup(&self, ip: &str) -> Option<AsnInfo>;

    /// Ranges whose ASN reputation is at least `min_reputation`,
    /// best first
    async fn high_value_ranges(&self, min_reputation: f64) -> Vec<ReputationRange>;
}
