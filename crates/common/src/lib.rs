//! Minerscope Common - shared types, traits and configuration
//!
//! This crate provides the data model handed between the scanner, the rule
//! engine and the geolocation resolver, the traits through which network
//! access and persistence are injected, and the TOML configuration.

pub mod config;
pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{GeolocationConfig, MinerPorts, MinerScopeConfig, RulesConfig, ScanConfig};
pub use error::{MinerScopeError, MinerScopeResult};
pub use memory::MemoryScanStore;
pub use traits::{GeoCache, HostnameResolver, Pinger, PortProber, ScanStore};
pub use types::{
    BoundingBox, Classification, GeoRecord, HostRecord, HostScanResult, HostStatus, MinerType,
    PingOutcome, PortResult, ProbeOptions, ScanId, ScanRecord, ScanStats, ScanStatus,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
