//! DNS resolution for outbound fetches.
//!
//! Every host name reqwest connects to goes through [`GuardedResolver`],
//! including redirect targets, so the addresses that are actually dialed are
//! the ones checked. IP literals never reach a resolver; the URL validator
//! screens those.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use bulwark_core::url_guard::is_private_ip;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A host name resolved to an address the fetcher must not contact.
#[derive(Debug, thiserror::Error)]
#[error("{host} resolves to private address {addr}")]
pub struct BlockedAddress {
    pub host: String,
    pub addr: IpAddr,
}

#[derive(Debug, Clone, Default)]
pub struct GuardedResolver {
    block_private: bool,
    static_hosts: HashMap<String, Vec<IpAddr>>,
}

impl GuardedResolver {
    pub fn new(block_private: bool) -> Self {
        Self {
            block_private,
            static_hosts: HashMap::new(),
        }
    }

    /// Answer `host` from a fixed table instead of the system resolver.
    #[cfg(test)]
    pub fn with_static_host(mut self, host: &str, addr: IpAddr) -> Self {
        self.static_hosts
            .entry(host.to_ascii_lowercase())
            .or_default()
            .push(addr);
        self
    }

    async fn lookup(&self, host: &str) -> Result<Vec<SocketAddr>, BoxError> {
        let addrs: Vec<SocketAddr> = match self.static_hosts.get(&host.to_ascii_lowercase()) {
            Some(ips) => ips.iter().map(|ip| SocketAddr::new(*ip, 0)).collect(),
            None => tokio::net::lookup_host((host, 0)).await?.collect(),
        };
        if self.block_private {
            screen_addresses(host, &addrs)?;
        }
        Ok(addrs)
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            let host = name.as_str();
            let addrs = resolver.lookup(host).await?;
            tracing::trace!(host, count = addrs.len(), "Resolved host");
            Ok::<Addrs, BoxError>(Box::new(addrs.into_iter()))
        })
    }
}

/// Reject the whole answer if any address is private. A mixed answer would
/// let the connector fall through to the private entry.
fn screen_addresses(host: &str, addrs: &[SocketAddr]) -> Result<(), BlockedAddress> {
    match addrs.iter().find(|addr| is_private_ip(addr.ip())) {
        Some(addr) => {
            tracing::warn!(host, addr = %addr.ip(), "Refusing private address");
            Err(BlockedAddress {
                host: host.to_string(),
                addr: addr.ip(),
            })
        }
        None => Ok(()),
    }
}
