//! Runtime configuration
//!
//! Loaded from a TOML file. Every section and key is optional and falls back
//! to the defaults below; a file that does not parse is a hard error.

use crate::error::{MinerScopeError, MinerScopeResult};
use crate::types::{BoundingBox, ProbeOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable holding the fallback geolocation bearer token.
pub const FALLBACK_TOKEN_ENV: &str = "MINERSCOPE_IPINFO_TOKEN";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerScopeConfig {
    pub scan: ScanConfig,
    pub geolocation: GeolocationConfig,
    pub miner_ports: MinerPorts,
    pub rules: RulesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub timeout_ms: u64,
    pub max_concurrent: usize,
    /// Concurrent probes allowed against a single host.
    pub per_host_concurrency: usize,
    pub ping_enabled: bool,
    pub ping_timeout_ms: u64,
    pub hostname_timeout_ms: u64,
    pub banner_grab_enabled: bool,
    pub banner_timeout_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            max_concurrent: 50,
            per_host_concurrency: 16,
            ping_enabled: true,
            ping_timeout_ms: 1000,
            hostname_timeout_ms: 1000,
            banner_grab_enabled: true,
            banner_timeout_ms: 2000,
        }
    }
}

impl ScanConfig {
    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            connect_timeout: Duration::from_millis(self.timeout_ms),
            banner_timeout: Duration::from_millis(self.banner_timeout_ms),
            grab_banner: self.banner_grab_enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationConfig {
    pub enabled: bool,
    pub rate_limit_per_minute: u32,
    pub window_secs: u64,
    /// Bearer token for the fallback provider. No token, no fallback.
    pub api_key: Option<String>,
    pub cache_ttl_hours: u64,
    pub request_timeout_secs: u64,
    pub primary_url: String,
    pub fallback_url: String,
    pub region_filter: bool,
    pub region: BoundingBox,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_limit_per_minute: 45,
            window_secs: 60,
            api_key: None,
            cache_ttl_hours: 24,
            request_timeout_secs: 10,
            primary_url: "http://ip-api.com".to_string(),
            fallback_url: "https://ipinfo.io".to_string(),
            region_filter: true,
            region: BoundingBox::ilam(),
        }
    }
}

impl GeolocationConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours.saturating_mul(3600))
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Known cryptocurrency miner ports, by family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerPorts {
    pub stratum: Vec<u16>,
    pub bitcoin: Vec<u16>,
    pub ethereum: Vec<u16>,
    pub generic: Vec<u16>,
}

impl Default for MinerPorts {
    fn default() -> Self {
        Self {
            stratum: vec![3333, 4444, 4028, 7777, 14433, 14444, 5555, 8888, 9999],
            bitcoin: vec![8332, 8333, 18332, 18333],
            ethereum: vec![8545, 8546, 30303, 30304],
            generic: vec![8080, 8081, 3000, 9090],
        }
    }
}

impl MinerPorts {
    /// Sorted, deduplicated union of every configured port.
    pub fn all_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .stratum
            .iter()
            .chain(&self.bitcoin)
            .chain(&self.ethereum)
            .chain(&self.generic)
            .copied()
            .collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub path: Option<PathBuf>,
    pub confidence_threshold: f64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: None,
            confidence_threshold: 0.5,
        }
    }
}

impl MinerScopeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> MinerScopeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MinerScopeError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> MinerScopeResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| MinerScopeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> MinerScopeResult<String> {
        toml::to_string_pretty(self).map_err(|e| MinerScopeError::Config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> MinerScopeResult<()> {
        let content = self.to_toml_string()?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Pick up overrides from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(FALLBACK_TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.geolocation.api_key = Some(token.trim().to_string());
            }
        }
    }

    pub fn validate(&self) -> MinerScopeResult<()> {
        let scan = &self.scan;
        if scan.max_concurrent == 0 || scan.per_host_concurrency == 0 {
            return Err(MinerScopeError::Config(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        if scan.timeout_ms == 0 || scan.ping_timeout_ms == 0 || scan.hostname_timeout_ms == 0 {
            return Err(MinerScopeError::Config("timeouts must be non-zero".to_string()));
        }
        if scan.banner_grab_enabled && scan.banner_timeout_ms == 0 {
            return Err(MinerScopeError::Config(
                "banner_timeout_ms must be non-zero when banner grabbing is enabled".to_string(),
            ));
        }

        let geo = &self.geolocation;
        if geo.rate_limit_per_minute == 0 || geo.window_secs == 0 {
            return Err(MinerScopeError::Config(
                "geolocation rate limit and window must be non-zero".to_string(),
            ));
        }
        if !geo.region.is_well_formed() {
            return Err(MinerScopeError::Config(format!(
                "invalid region bounding box {:?}",
                geo.region
            )));
        }

        let threshold = self.rules.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MinerScopeError::Config(format!(
                "confidence_threshold {} outside [0, 1]",
                threshold
            )));
        }
        if self.miner_ports.all_ports().is_empty() {
            return Err(MinerScopeError::Config("no miner ports configured".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MinerScopeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan.max_concurrent, 50);
        assert_eq!(config.geolocation.rate_limit_per_minute, 45);
    }

    #[test]
    fn all_ports_sorted_unique() {
        let ports = MinerPorts::default().all_ports();
        assert_eq!(ports.first(), Some(&3000));
        assert_eq!(ports.last(), Some(&30304));
        let mut deduped = ports.clone();
        deduped.dedup();
        assert_eq!(ports, deduped);
        assert!(ports.contains(&3333) && ports.contains(&8545));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config = MinerScopeConfig::from_toml_str(
            r#"
            [scan]
            max_concurrent = 8

            [geolocation]
            region_filter = false
            "#,
        )
        .unwrap();
        assert_eq!(config.scan.max_concurrent, 8);
        assert_eq!(config.scan.timeout_ms, 3000);
        assert!(!config.geolocation.region_filter);
        assert_eq!(config.geolocation.region, BoundingBox::ilam());
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(MinerScopeConfig::from_toml_str("[scan]\nmax_concurrent = 0\n").is_err());
        assert!(MinerScopeConfig::from_toml_str("[rules]\nconfidence_threshold = 1.5\n").is_err());
        assert!(MinerScopeConfig::from_toml_str("not = [valid").is_err());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("minerscope.toml");

        let mut config = MinerScopeConfig::default();
        config.scan.per_host_concurrency = 4;
        config.geolocation.api_key = Some("token".to_string());
        config.save(&path).unwrap();

        let loaded = MinerScopeConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn probe_options_follow_scan_config() {
        let scan = ScanConfig {
            banner_grab_enabled: false,
            ..ScanConfig::default()
        };
        let options = scan.probe_options();
        assert_eq!(options.connect_timeout, Duration::from_millis(3000));
        assert!(!options.grab_banner);
    }
}
