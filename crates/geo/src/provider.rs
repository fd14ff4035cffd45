//! Geolocation providers and response normalization

use crate::error::ResolutionFailure;
use async_trait::async_trait;
use minerscope_common::{GeoRecord, MinerScopeError, MinerScopeResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, instrument};

pub const IP_API_SOURCE: &str = "ip-api";
pub const IPINFO_SOURCE: &str = "ipinfo";

const IP_API_FIELDS: &str = "status,message,country,countryCode,region,regionName,city,lat,lon,isp,org,as,query";

/// One upstream geolocation service.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Look up `address`. Transport errors, non-2xx statuses, undecodable
    /// payloads and provider-reported failures all come back as
    /// [`ResolutionFailure::Provider`].
    async fn lookup(&self, address: Ipv4Addr) -> Result<GeoRecord, ResolutionFailure>;
}

/// Shared HTTP client with the per-request timeout applied.
pub fn build_http_client(timeout: Duration) -> MinerScopeResult<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("minerscope/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| MinerScopeError::Config(format!("cannot build HTTP client: {}", e)))
}

async fn fetch_json<T: DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, ResolutionFailure> {
    let response = request
        .send()
        .await
        .map_err(|e| ResolutionFailure::provider(provider, e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ResolutionFailure::provider(provider, format!("HTTP {}", status)));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ResolutionFailure::provider(provider, format!("malformed payload: {}", e)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpApiResponse {
    pub status: String,
    pub message: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region_name: Option<String>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub isp: Option<String>,
    pub org: Option<String>,
}

/// Turn an ip-api payload into a record; `status != "success"` is a failure.
pub fn normalize_ip_api(
    address: Ipv4Addr,
    response: IpApiResponse,
) -> Result<GeoRecord, ResolutionFailure> {
    if response.status != "success" {
        let message = response
            .message
            .unwrap_or_else(|| format!("status {}", response.status));
        return Err(ResolutionFailure::provider(IP_API_SOURCE, message));
    }
    let mut record = GeoRecord::new(address, IP_API_SOURCE);
    record.country = non_empty(response.country);
    record.country_code = non_empty(response.country_code);
    record.region = non_empty(response.region_name);
    record.city = non_empty(response.city);
    record.latitude = response.lat;
    record.longitude = response.lon;
    record.isp = non_empty(response.isp);
    record.org = non_empty(response.org);
    Ok(record)
}

/// Primary provider: ip-api.com JSON endpoint. No key; 45 requests/minute.
pub struct IpApiProvider {
    client: Client,
    base_url: String,
}

impl IpApiProvider {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GeoProvider for IpApiProvider {
    fn name(&self) -> &str {
        IP_API_SOURCE
    }

    #[instrument(skip(self))]
    async fn lookup(&self, address: Ipv4Addr) -> Result<GeoRecord, ResolutionFailure> {
        let url = format!("{}/json/{}", self.base_url, address);
        let request = self.client.get(&url).query(&[("fields", IP_API_FIELDS)]);
        let response: IpApiResponse = fetch_json(IP_API_SOURCE, request).await?;
        let record = normalize_ip_api(address, response)?;
        debug!(
            "ip-api: {} -> {:?}, {:?}, {:?}",
            address, record.city, record.region, record.country
        );
        Ok(record)
    }
}

#[derive(Debug, Deserialize)]
pub struct IpInfoResponse {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    /// "lat,lon"
    pub loc: Option<String>,
    pub org: Option<String>,
}

/// "32.6,46.9" → (32.6, 46.9). Anything else gives no coordinates.
fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lon) = loc.split_once(',')?;
    Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
}

/// ipinfo reports only a country code and folds ISP into `org`.
pub fn normalize_ipinfo(address: Ipv4Addr, response: IpInfoResponse) -> GeoRecord {
    let mut record = GeoRecord::new(address, IPINFO_SOURCE);
    let country = non_empty(response.country);
    record.country_code = country.clone();
    record.country = country;
    record.region = non_empty(response.region);
    record.city = non_empty(response.city);
    if let Some((lat, lon)) = response.loc.as_deref().and_then(parse_loc) {
        record.latitude = Some(lat);
        record.longitude = Some(lon);
    }
    let org = non_empty(response.org);
    record.isp = org.clone();
    record.org = org;
    record
}

/// Fallback provider: ipinfo.io with a bearer token.
pub struct IpInfoProvider {
    client: Client,
    base_url: String,
    token: String,
}

impl IpInfoProvider {
    pub fn new(client: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl GeoProvider for IpInfoProvider {
    fn name(&self) -> &str {
        IPINFO_SOURCE
    }

    #[instrument(skip(self))]
    async fn lookup(&self, address: Ipv4Addr) -> Result<GeoRecord, ResolutionFailure> {
        let url = format!("{}/{}/json", self.base_url, address);
        let request = self.client.get(&url).bearer_auth(&self.token);
        let response: IpInfoResponse = fetch_json(IPINFO_SOURCE, request).await?;
        Ok(normalize_ipinfo(address, response))
    }
}
