//! Core data types for the minerscope detection pipeline
//!
//! Scan results are produced once and handed downstream by value. The rule
//! engine never mutates a `HostScanResult`; it derives a `Classification`
//! sibling record from it instead.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound on the raw banner bytes kept per port.
pub const MAX_BANNER_BYTES: usize = 500;

/// Scan-error text attached to a host scan interrupted by cancellation.
pub const CANCELLED_ERROR: &str = "cancelled";

/// Tuning for a single TCP probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOptions {
    pub connect_timeout: Duration,
    pub banner_timeout: Duration,
    pub grab_banner: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            banner_timeout: Duration::from_millis(2000),
            grab_banner: true,
        }
    }
}

/// Outcome of probing one address:port pair.
///
/// Public fields keep the rule engine's hot loop free of accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortResult {
    pub port: u16,
    pub open: bool,
    pub banner: Option<String>,
    pub service_guess: String,
    pub response_time_ms: f64,
}

impl PortResult {
    #[inline]
    #[must_use]
    pub fn open(port: u16, rtt: Duration) -> Self {
        Self {
            port,
            open: true,
            banner: None,
            service_guess: String::from("unknown"),
            response_time_ms: rtt.as_secs_f64() * 1000.0,
        }
    }

    #[inline]
    #[must_use]
    pub fn closed(port: u16, rtt: Duration) -> Self {
        Self {
            open: false,
            ..Self::open(port, rtt)
        }
    }

    /// Builder: attach banner text. Empty (after trimming) banners are dropped.
    #[inline]
    #[must_use]
    pub fn with_banner(mut self, banner: String) -> Self {
        let trimmed = banner.trim();
        self.banner = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    #[inline]
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service_guess = service.into();
        self
    }
}

/// Decode raw banner bytes. The decoded text is at most [`MAX_BANNER_BYTES`]
/// long, replacement characters included.
pub fn decode_banner(raw: &[u8]) -> Option<String> {
    let bounded = &raw[..raw.len().min(MAX_BANNER_BYTES)];
    let text = String::from_utf8_lossy(bounded);
    let mut end = text.len().min(MAX_BANNER_BYTES);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let text = text[..end].trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// How a host scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostStatus::Completed => "completed",
            HostStatus::Cancelled => "cancelled",
            HostStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of ICMP reachability checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    Reply(Duration),
    NoReply,
    /// ICMP could not be used on this platform; treated as "ping disabled".
    Unavailable,
}

/// Aggregated result for one address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostScanResult {
    pub address: Ipv4Addr,
    pub hostname: Option<String>,
    pub reachable: bool,
    pub ping_ms: Option<f64>,
    /// Open ports only, sorted by port number.
    pub ports: Vec<PortResult>,
    pub scan_error: Option<String>,
    pub status: HostStatus,
    pub timestamp: DateTime<Utc>,
}

impl HostScanResult {
    #[must_use]
    pub fn new(address: Ipv4Addr) -> Self {
        Self {
            address,
            hostname: None,
            reachable: false,
            ping_ms: None,
            ports: Vec::new(),
            scan_error: None,
            status: HostStatus::Completed,
            timestamp: Utc::now(),
        }
    }

    /// A host whose scan was never started because cancellation came first.
    #[must_use]
    pub fn cancelled(address: Ipv4Addr) -> Self {
        let mut result = Self::new(address);
        result.mark_cancelled();
        result
    }

    #[must_use]
    pub fn failed(address: Ipv4Addr, error: impl Into<String>) -> Self {
        let mut result = Self::new(address);
        result.status = HostStatus::Failed;
        result.scan_error = Some(error.into());
        result
    }

    pub fn mark_cancelled(&mut self) {
        self.status = HostStatus::Cancelled;
        self.scan_error = Some(CANCELLED_ERROR.to_string());
    }

    /// Keep only open ports and order them by port number.
    pub fn set_ports(&mut self, mut ports: Vec<PortResult>) {
        ports.retain(|p| p.open);
        ports.sort_by_key(|p| p.port);
        ports.dedup_by_key(|p| p.port);
        self.ports = ports;
    }

    #[inline]
    #[must_use]
    pub fn open_ports(&self) -> Vec<u16> {
        self.ports.iter().map(|p| p.port).collect()
    }

    /// `(port, banner)` pairs for every open port that produced a banner.
    pub fn banners(&self) -> impl Iterator<Item = (u16, &str)> {
        self.ports
            .iter()
            .filter_map(|p| p.banner.as_deref().map(|b| (p.port, b)))
    }

    #[inline]
    #[must_use]
    pub fn has_open_ports(&self) -> bool {
        !self.ports.is_empty()
    }

    #[inline]
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.status, HostStatus::Cancelled)
    }

    #[inline]
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.status, HostStatus::Failed)
    }
}

/// Family of mining software a host is classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinerType {
    Stratum,
    Bitcoin,
    Ethereum,
    Monero,
    WebMining,
    Gpu,
    Unknown,
}

impl MinerType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MinerType::Stratum => "stratum",
            MinerType::Bitcoin => "bitcoin",
            MinerType::Ethereum => "ethereum",
            MinerType::Monero => "monero",
            MinerType::WebMining => "web_mining",
            MinerType::Gpu => "gpu",
            MinerType::Unknown => "unknown",
        }
    }

    /// Map a rule tag onto a miner family, if the tag names one.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "stratum" | "mining_pool" => Some(MinerType::Stratum),
            "bitcoin" => Some(MinerType::Bitcoin),
            "ethereum" => Some(MinerType::Ethereum),
            "monero" | "xmrig" => Some(MinerType::Monero),
            "web_mining" | "coinhive" => Some(MinerType::WebMining),
            "gpu" => Some(MinerType::Gpu),
            _ => None,
        }
    }
}

impl fmt::Display for MinerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection verdict derived from a `HostScanResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub is_miner: bool,
    pub confidence: f64,
    pub miner_type: Option<MinerType>,
    pub matched_rules: Vec<String>,
}

impl Classification {
    #[must_use]
    pub fn clean() -> Self {
        Self {
            is_miner: false,
            confidence: 0.0,
            miner_type: None,
            matched_rules: Vec::new(),
        }
    }
}

impl Default for Classification {
    fn default() -> Self {
        Self::clean()
    }
}

/// Inclusive latitude/longitude rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        }
    }

    /// Approximate bounds of Ilam province.
    #[must_use]
    pub const fn ilam() -> Self {
        Self::new(32.5, 33.5, 46.0, 47.5)
    }

    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        [self.lat_min, self.lat_max, self.lon_min, self.lon_max]
            .iter()
            .all(|v| v.is_finite())
            && self.lat_min <= self.lat_max
            && self.lon_min <= self.lon_max
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::ilam()
    }
}

/// Normalized geolocation for one address, regardless of provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoRecord {
    pub address: Ipv4Addr,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub isp: Option<String>,
    pub org: Option<String>,
    pub source: String,
    pub resolved_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl GeoRecord {
    #[must_use]
    pub fn new(address: Ipv4Addr, source: impl Into<String>) -> Self {
        Self {
            address,
            country: None,
            country_code: None,
            region: None,
            city: None,
            latitude: None,
            longitude: None,
            isp: None,
            org: None,
            source: source.into(),
            resolved_at: Utc::now(),
            ttl_secs: 0,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }

    /// `None` when the TTL reaches past the representable calendar.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        // ~100 years
        const MAX_TTL_SECS: u64 = 3_153_600_000;
        let ttl = self.ttl_secs.min(MAX_TTL_SECS) as i64;
        self.resolved_at
            .checked_add_signed(ChronoDuration::seconds(ttl))
    }

    /// Expired strictly when `resolved_at + ttl < now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map_or(false, |expiry| expiry < now)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Coordinates, when the provider reported both.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

/// Identifier of one scan run in the persistence collaborator.
pub type ScanId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Error,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Cancelled => "cancelled",
            ScanStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Scan-run metadata and totals as handed to the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: ScanId,
    pub name: String,
    pub target_spec: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_hosts: u64,
    pub scanned_hosts: u64,
    pub responsive_hosts: u64,
    pub miners_detected: u64,
    pub failed_hosts: u64,
    pub out_of_region: u64,
    pub geo_failures: u64,
    pub status: ScanStatus,
}

impl ScanRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, target_spec: impl Into<String>, total_hosts: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            target_spec: target_spec.into(),
            started_at: Utc::now(),
            finished_at: None,
            total_hosts,
            scanned_hosts: 0,
            responsive_hosts: 0,
            miners_detected: 0,
            failed_hosts: 0,
            out_of_region: 0,
            geo_failures: 0,
            status: ScanStatus::Pending,
        }
    }
}

/// One host as persisted and reported: scan evidence, verdict, location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub scan_id: ScanId,
    pub scan: HostScanResult,
    pub classification: Classification,
    pub geo: Option<GeoRecord>,
    pub geo_error: Option<String>,
}

/// Runtime statistics collected incrementally as host results arrive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub total_hosts: u64,
    pub scanned: u64,
    pub reachable: u64,
    pub open_ports: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub elapsed: Duration,
}

impl ScanStats {
    #[inline]
    #[must_use]
    pub fn new(total_hosts: u64) -> Self {
        Self {
            total_hosts,
            ..Default::default()
        }
    }

    /// Progress percentage in [0.0, 100.0].
    #[inline]
    #[must_use]
    pub fn progress(&self) -> f32 {
        if self.total_hosts == 0 {
            0.0
        } else {
            (self.scanned as f32 / self.total_hosts as f32) * 100.0
        }
    }

    /// Hosts per second.
    #[inline]
    #[must_use]
    pub fn rate(&self) -> f32 {
        if self.elapsed.as_secs_f32() == 0.0 {
            0.0
        } else {
            self.scanned as f32 / self.elapsed.as_secs_f32()
        }
    }

    pub fn update(&mut self, result: &HostScanResult) {
        self.scanned = self.scanned.saturating_add(1);
        if result.reachable {
            self.reachable = self.reachable.saturating_add(1);
        }
        self.open_ports = self.open_ports.saturating_add(result.ports.len() as u64);
        match result.status {
            HostStatus::Completed => {}
            HostStatus::Cancelled => self.cancelled = self.cancelled.saturating_add(1),
            HostStatus::Failed => self.failed = self.failed.saturating_add(1),
        }
    }
}
