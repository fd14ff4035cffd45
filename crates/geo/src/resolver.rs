//! Cache-first, rate-limited resolution with provider fallback

use crate::error::ResolutionFailure;
use crate::provider::{build_http_client, GeoProvider, IpApiProvider, IpInfoProvider};
use crate::rate_limiter::RateLimiter;
use crate::region::record_in_region;
use minerscope_common::{BoundingBox, GeoCache, GeoRecord, GeolocationConfig, MinerScopeResult};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Addresses no public provider can place.
pub fn is_local_address(address: Ipv4Addr) -> bool {
    address.is_loopback()
        || address.is_private()
        || address.is_link_local()
        || address.is_unspecified()
        || address.is_broadcast()
}

pub struct GeoResolver {
    cache: Arc<dyn GeoCache>,
    limiter: Arc<RateLimiter>,
    primary: Arc<dyn GeoProvider>,
    fallback: Option<Arc<dyn GeoProvider>>,
    ttl: Duration,
}

impl GeoResolver {
    pub fn new(
        primary: Arc<dyn GeoProvider>,
        cache: Arc<dyn GeoCache>,
        limiter: Arc<RateLimiter>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            limiter,
            primary,
            fallback: None,
            ttl,
        }
    }

    /// The fallback is consulted only after the primary fails and does not
    /// draw from the shared bucket.
    pub fn with_fallback(mut self, fallback: Arc<dyn GeoProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// ip-api as primary; ipinfo as fallback when a token is configured.
    pub fn from_config(config: &GeolocationConfig, cache: Arc<dyn GeoCache>) -> MinerScopeResult<Self> {
        let client = build_http_client(Duration::from_secs(config.request_timeout_secs))?;
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute, config.window()));
        let primary = Arc::new(IpApiProvider::new(client.clone(), config.primary_url.clone()));
        let mut resolver = Self::new(primary, cache, limiter, config.cache_ttl());

        if let Some(token) = config.api_key.as_deref().filter(|t| !t.is_empty()) {
            resolver = resolver.with_fallback(Arc::new(IpInfoProvider::new(
                client,
                config.fallback_url.clone(),
                token,
            )));
        } else {
            debug!("No fallback geolocation token configured");
        }
        Ok(resolver)
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub async fn resolve(&self, address: Ipv4Addr) -> Result<GeoRecord, ResolutionFailure> {
        self.resolve_with_cancel(address, &CancellationToken::new()).await
    }

    /// Resolve one address; waiting on the rate limit or a provider is
    /// abandoned as soon as `cancel` fires.
    #[instrument(skip(self, cancel))]
    pub async fn resolve_with_cancel(
        &self,
        address: Ipv4Addr,
        cancel: &CancellationToken,
    ) -> Result<GeoRecord, ResolutionFailure> {
        if is_local_address(address) {
            return Err(ResolutionFailure::LocalAddress);
        }

        if let Some(cached) = self.cache.get_cached_geo(address).await {
            if !cached.is_expired() {
                debug!("Cache hit for {}", address);
                return Ok(cached);
            }
        }

        self.limiter.acquire_with_cancel(cancel).await?;

        let last_error = match self.query(self.primary.as_ref(), address, cancel).await {
            Ok(record) => return Ok(self.store(record).await),
            Err(ResolutionFailure::Cancelled) => return Err(ResolutionFailure::Cancelled),
            Err(e) => {
                warn!("Primary geolocation failed for {}: {}", address, e);
                e
            }
        };

        let Some(fallback) = &self.fallback else {
            return Err(ResolutionFailure::Exhausted {
                last_error: last_error.to_string(),
            });
        };

        match self.query(fallback.as_ref(), address, cancel).await {
            Ok(record) => Ok(self.store(record).await),
            Err(ResolutionFailure::Cancelled) => Err(ResolutionFailure::Cancelled),
            Err(e) => {
                warn!("Fallback geolocation failed for {}: {}", address, e);
                Err(ResolutionFailure::Exhausted {
                    last_error: e.to_string(),
                })
            }
        }
    }

    async fn query(
        &self,
        provider: &dyn GeoProvider,
        address: Ipv4Addr,
        cancel: &CancellationToken,
    ) -> Result<GeoRecord, ResolutionFailure> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResolutionFailure::Cancelled),
            result = provider.lookup(address) => result,
        }
    }

    async fn store(&self, record: GeoRecord) -> GeoRecord {
        let record = record.with_ttl(self.ttl);
        self.cache.put_cached_geo(record.clone()).await;
        record
    }

    /// Resolve addresses one after another through the limiter. Failures are
    /// logged and skipped; with `region` set only records inside it are kept.
    pub async fn resolve_batch(
        &self,
        addresses: &[Ipv4Addr],
        region: Option<&BoundingBox>,
    ) -> Vec<GeoRecord> {
        let mut records = Vec::new();
        for &address in addresses {
            match self.resolve(address).await {
                Ok(record) => {
                    if region.map_or(true, |bbox| record_in_region(&record, bbox)) {
                        records.push(record);
                    }
                }
                Err(e) => warn!("Geolocation failed for {}: {}", address, e),
            }
        }
        info!(
            "Batch geolocation: {} of {} addresses kept",
            records.len(),
            addresses.len()
        );
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryGeoCache;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        name: &'static str,
        coords: Option<(f64, f64)>,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn ok(name: &'static str, lat: f64, lon: f64) -> Arc<Self> {
            Arc::new(Self {
                name,
                coords: Some((lat, lon)),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                coords: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GeoProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn lookup(&self, address: Ipv4Addr) -> Result<GeoRecord, ResolutionFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.coords {
                Some((lat, lon)) => {
                    let mut record = GeoRecord::new(address, self.name);
                    record.latitude = Some(lat);
                    record.longitude = Some(lon);
                    Ok(record)
                }
                None => Err(ResolutionFailure::provider(self.name, "HTTP 503 Service Unavailable")),
            }
        }
    }

    const PUBLIC: Ipv4Addr = Ipv4Addr::new(5, 160, 10, 20);

    fn resolver(primary: Arc<FakeProvider>, cache: Arc<MemoryGeoCache>) -> GeoResolver {
        GeoResolver::new(
            primary,
            cache,
            Arc::new(RateLimiter::per_minute(45)),
            Duration::from_secs(24 * 3600),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_uses_no_token() {
        let cache = Arc::new(MemoryGeoCache::new());
        let cached = GeoRecord::new(PUBLIC, "ip-api").with_ttl(Duration::from_secs(3600));
        cache.put_cached_geo(cached.clone()).await;

        let primary = FakeProvider::ok("ip-api", 33.0, 46.5);
        let resolver = resolver(primary.clone(), cache);
        let before = resolver.limiter().available_tokens();

        let record = resolver.resolve(PUBLIC).await.unwrap();
        assert_eq!(record, cached);
        assert_eq!(resolver.limiter().available_tokens(), before);
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_queries_primary_and_caches() {
        let cache = Arc::new(MemoryGeoCache::new());
        let primary = FakeProvider::ok("ip-api", 33.0, 46.5);
        let resolver = resolver(primary.clone(), cache.clone());

        let record = resolver.resolve(PUBLIC).await.unwrap();
        assert_eq!(record.ttl_secs, 24 * 3600);
        assert_eq!(primary.calls(), 1);
        assert_eq!(resolver.limiter().available_tokens(), 44.0);
        assert_eq!(cache.get_cached_geo(PUBLIC).await, Some(record));

        resolver.resolve(PUBLIC).await.unwrap();
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_refreshed() {
        let cache = Arc::new(MemoryGeoCache::new());
        let mut stale = GeoRecord::new(PUBLIC, "ip-api").with_ttl(Duration::from_secs(60));
        stale.resolved_at = Utc::now() - ChronoDuration::hours(2);
        cache.put_cached_geo(stale).await;

        let primary = FakeProvider::ok("ip-api", 33.0, 46.5);
        let resolver = resolver(primary.clone(), cache.clone());
        let record = resolver.resolve(PUBLIC).await.unwrap();

        assert_eq!(primary.calls(), 1);
        assert!(!cache.get_cached_geo(PUBLIC).await.unwrap().is_expired());
        assert_eq!(record.latitude, Some(33.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_primary_failure() {
        let cache = Arc::new(MemoryGeoCache::new());
        let primary = FakeProvider::failing("ip-api");
        let fallback = FakeProvider::ok("ipinfo", 33.6, 46.4);
        let resolver = resolver(primary.clone(), cache).with_fallback(fallback.clone());

        let record = resolver.resolve(PUBLIC).await.unwrap();
        assert_eq!(record.source, "ipinfo");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
        // Only the primary draws from the bucket.
        assert_eq!(resolver.limiter().available_tokens(), 44.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_fallback_without_token() {
        let primary = FakeProvider::failing("ip-api");
        let resolver = resolver(primary, Arc::new(MemoryGeoCache::new()));
        assert!(!resolver.has_fallback());

        let err = resolver.resolve(PUBLIC).await.unwrap_err();
        match err {
            ResolutionFailure::Exhausted { last_error } => {
                assert!(last_error.contains("ip-api"));
                assert!(last_error.contains("503"));
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_fail_reports_last_error() {
        let resolver = resolver(FakeProvider::failing("ip-api"), Arc::new(MemoryGeoCache::new()))
            .with_fallback(FakeProvider::failing("ipinfo"));
        let err = resolver.resolve(PUBLIC).await.unwrap_err();
        assert_eq!(
            err,
            ResolutionFailure::Exhausted {
                last_error: "ipinfo: HTTP 503 Service Unavailable".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_addresses_rejected() {
        let primary = FakeProvider::ok("ip-api", 0.0, 0.0);
        let resolver = resolver(primary.clone(), Arc::new(MemoryGeoCache::new()));
        for addr in [
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::new(10, 1, 2, 3),
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(172, 16, 0, 1),
            Ipv4Addr::new(169, 254, 0, 1),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
        ] {
            assert_eq!(resolver.resolve(addr).await, Err(ResolutionFailure::LocalAddress));
        }
        assert_eq!(primary.calls(), 0);
        assert_eq!(resolver.limiter().available_tokens(), 45.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_rate_limited() {
        let resolver = GeoResolver::new(
            FakeProvider::ok("ip-api", 33.0, 46.5),
            Arc::new(MemoryGeoCache::new()),
            Arc::new(RateLimiter::new(1, Duration::from_secs(3600))),
            Duration::from_secs(60),
        );
        resolver.resolve(PUBLIC).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resolver
            .resolve_with_cancel(Ipv4Addr::new(5, 160, 10, 21), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ResolutionFailure::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_region_filter() {
        struct ByAddress;

        #[async_trait]
        impl GeoProvider for ByAddress {
            fn name(&self) -> &str {
                "by-address"
            }

            async fn lookup(&self, address: Ipv4Addr) -> Result<GeoRecord, ResolutionFailure> {
                let mut record = GeoRecord::new(address, "by-address");
                let (lat, lon) = if address.octets()[3] % 2 == 0 {
                    (33.2, 46.9)
                } else {
                    (35.7, 51.4)
                };
                record.latitude = Some(lat);
                record.longitude = Some(lon);
                Ok(record)
            }
        }

        let resolver = GeoResolver::new(
            Arc::new(ByAddress),
            Arc::new(MemoryGeoCache::new()),
            Arc::new(RateLimiter::per_minute(45)),
            Duration::from_secs(60),
        );
        let addresses: Vec<Ipv4Addr> = (1..=4).map(|i| Ipv4Addr::new(5, 160, 0, i)).collect();

        let all = resolver.resolve_batch(&addresses, None).await;
        assert_eq!(all.len(), 4);

        let ilam = BoundingBox::ilam();
        let inside = resolver.resolve_batch(&addresses, Some(&ilam)).await;
        let kept: Vec<Ipv4Addr> = inside.iter().map(|r| r.address).collect();
        assert_eq!(kept, vec![Ipv4Addr::new(5, 160, 0, 2), Ipv4Addr::new(5, 160, 0, 4)]);
    }
}
