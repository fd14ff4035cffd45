//! Reverse DNS through trust-dns

use async_trait::async_trait;
use minerscope_common::HostnameResolver;
use std::net::{IpAddr, Ipv4Addr};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;
use tracing::debug;

/// PTR lookups against the system's configured resolvers, falling back to
/// the trust-dns defaults when `/etc/resolv.conf` cannot be read.
pub struct DnsHostnameResolver {
    resolver: TokioAsyncResolver,
}

impl DnsHostnameResolver {
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            debug!("system resolver config unavailable ({}), using defaults", e);
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }
}

impl Default for DnsHostnameResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostnameResolver for DnsHostnameResolver {
    async fn reverse(&self, address: Ipv4Addr) -> Option<String> {
        match self.resolver.reverse_lookup(IpAddr::V4(address)).await {
            Ok(response) => response
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string())
                .filter(|name| !name.is_empty()),
            Err(e) => {
                debug!("reverse lookup for {} failed: {}", address, e);
                None
            }
        }
    }
}
