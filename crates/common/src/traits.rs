//! Seams between the detection core and its collaborators
//!
//! Network access (TCP, ICMP, reverse DNS) and persistence are injected
//! through these traits so tests can substitute fakes.

use crate::error::MinerScopeResult;
use crate::types::{GeoRecord, HostRecord, PingOutcome, PortResult, ProbeOptions, ScanId, ScanRecord};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;

/// One bounded TCP connect (plus optional banner read) against one port.
///
/// Implementations never fail: refused, timed out and unreachable all fold
/// into `PortResult { open: false, .. }`.
#[async_trait]
pub trait PortProber: Send + Sync {
    async fn probe(&self, address: Ipv4Addr, port: u16, options: &ProbeOptions) -> PortResult;

    /// Prober name/identifier
    fn name(&self) -> &str;
}

/// ICMP echo with its own timeout.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, address: Ipv4Addr, timeout: Duration) -> PingOutcome;
}

/// Reverse (PTR) lookup. Failure is simply `None`.
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    async fn reverse(&self, address: Ipv4Addr) -> Option<String>;
}

/// Geolocation cache keyed by address.
///
/// The cache may hand back expired entries; the resolver checks expiry at read
/// time. Writes overwrite.
#[async_trait]
pub trait GeoCache: Send + Sync {
    async fn get_cached_geo(&self, address: Ipv4Addr) -> Option<GeoRecord>;

    async fn put_cached_geo(&self, record: GeoRecord);
}

/// Storage backend for scan runs and their host results
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Register a new scan run and return its identifier.
    async fn create_scan_record(&self, record: ScanRecord) -> MinerScopeResult<ScanId>;

    /// Store a single host result
    async fn append_host_result(&self, host: &HostRecord) -> MinerScopeResult<()>;

    /// Store multiple host results (batch operation)
    async fn append_batch(&self, hosts: &[HostRecord]) -> MinerScopeResult<()> {
        for host in hosts {
            self.append_host_result(host).await?;
        }
        Ok(())
    }

    /// Overwrite the run's totals and final status.
    async fn finalize_scan_record(&self, record: &ScanRecord) -> MinerScopeResult<()>;
}
