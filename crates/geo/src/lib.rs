//! Geolocation for responsive hosts
//!
//! [`GeoResolver`] checks the cache, takes a token from the shared
//! [`RateLimiter`], asks the primary provider and falls back to a second
//! provider when one is configured. [`in_region`] narrows the results to a
//! bounding box.

mod cache;
mod error;
mod provider;
mod rate_limiter;
mod region;
mod resolver;

pub use cache::MemoryGeoCache;
pub use error::ResolutionFailure;
pub use provider::{
    build_http_client, normalize_ip_api, normalize_ipinfo, GeoProvider, IpApiProvider,
    IpApiResponse, IpInfoProvider, IpInfoResponse, IPINFO_SOURCE, IP_API_SOURCE,
};
pub use rate_limiter::RateLimiter;
pub use region::{in_region, record_in_region};
pub use resolver::{is_local_address, GeoResolver};
