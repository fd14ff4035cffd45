//! In-process geolocation cache

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use minerscope_common::{GeoCache, GeoRecord};
use std::net::Ipv4Addr;

/// Concurrent map keyed by address. Expired entries stay until
/// [`purge_expired`](Self::purge_expired) runs; the resolver skips them on
/// read.
#[derive(Debug, Default)]
pub struct MemoryGeoCache {
    entries: DashMap<Ipv4Addr, GeoRecord>,
}

impl MemoryGeoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries expired as of `now`; returns how many went.
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, record| !record.is_expired_at(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }
}

#[async_trait]
impl GeoCache for MemoryGeoCache {
    async fn get_cached_geo(&self, address: Ipv4Addr) -> Option<GeoRecord> {
        self.entries.get(&address).map(|entry| entry.value().clone())
    }

    async fn put_cached_geo(&self, record: GeoRecord) {
        self.entries.insert(record.address, record);
    }
}
