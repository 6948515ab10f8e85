//! Abuse contact discovery, cached per subnet for the life of the process

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Source of abuse contacts for a subnet (WHOIS in production)
#[async_trait]
pub trait AbuseContactLookup: Send + Sync {
    async fn lookup(&self, subnet: &IpNet) -> Option<String>;
}

/// Answers every subnet with the same contact
#[derive(Debug, Clone)]
pub struct StaticAbuseContact(pub String);

impl Default for StaticAbuseContact {
    fn default() -> Self {
        Self("abuse@example.com".to_string())
    }
}

#[async_trait]
impl AbuseContactLookup for StaticAbuseContact {
    async fn lookup(&self, _subnet: &IpNet) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Per-subnet cache in front of an `AbuseContactLookup`
///
/// Each subnet is resolved at most once, even under concurrent first
/// contact. A lookup that exceeds the timeout yields `None` and leaves the
/// subnet unresolved for a later attempt.
pub struct AbuseContactCache {
    lookup: Arc<dyn AbuseContactLookup>,
    lookup_timeout: Duration,
    contacts: DashMap<IpNet, Arc<OnceCell<Option<String>>>>,
}

impl AbuseContactCache {
    pub fn new(lookup: Arc<dyn AbuseContactLookup>, lookup_timeout: Duration) -> Self {
        Self {
            lookup,
            lookup_timeout,
            contacts: DashMap::new(),
        }
    }

    pub async fn contact_for(&self, ip: &IpAddr) -> Option<String> {
        let subnet = contact_subnet(ip);
        let cell = self
            .contacts
            .entry(subnet)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let resolved = cell
            .get_or_try_init(|| async move {
                debug!("Resolving abuse contact for {}", subnet);
                timeout(self.lookup_timeout, self.lookup.lookup(&subnet)).await
            })
            .await;

        match resolved {
            Ok(contact) => contact.clone(),
            Err(_) => {
                warn!("Abuse contact lookup for {} timed out", subnet);
                None
            }
        }
    }

    /// Number of subnets with a resolved entry
    pub fn len(&self) -> usize {
        self.contacts
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The subnet an abuse contact is cached under: /24 for IPv4, /48 for IPv6
pub fn contact_subnet(ip: &IpAddr) -> IpNet {
    match ip {
        IpAddr::V4(v4) => IpNet::V4(ipv4_to_default_cidr(*v4)),
        IpAddr::V6(v6) => {
            let net = Ipv6Net::new(*v6, 48)
                .unwrap_or_else(|_| Ipv6Net::from(Ipv6Addr::UNSPECIFIED));
            IpNet::V6(net.trunc())
        }
    }
}

fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    let net = Ipv4Addr::new(o[0], o[1], o[2], 0);
    Ipv4Net::new(net, 24).unwrap_or_else(|_| Ipv4Net::from(net))
}
