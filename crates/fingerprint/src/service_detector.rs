//! Service naming from port numbers and banners
//!
//! Mining ports win over generic IANA names; a banner is only consulted when
//! neither table knows the port.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

pub const UNKNOWN_SERVICE: &str = "unknown";

/// A service identified from a banner, with whatever product/version the
/// banner gave away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMatch {
    pub service: String,
    pub product: Option<String>,
    pub version: Option<String>,
}

impl ServiceMatch {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            product: None,
            version: None,
        }
    }

    fn with_details(mut self, product: Option<String>, version: Option<String>) -> Self {
        self.product = product.filter(|p| !p.is_empty());
        self.version = version.filter(|v| !v.is_empty());
        self
    }
}

impl fmt::Display for ServiceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.product, &self.version) {
            (Some(p), Some(v)) => write!(f, "{} ({} {})", self.service, p, v),
            (Some(p), None) => write!(f, "{} ({})", self.service, p),
            (None, Some(v)) => write!(f, "{} ({})", self.service, v),
            (None, None) => f.write_str(&self.service),
        }
    }
}

/// Names for ports commonly exposed by mining software.
pub fn miner_service_name(port: u16) -> Option<&'static str> {
    let name = match port {
        3333 | 4444 | 5555 | 7777 | 8888 | 9999 => "Stratum Mining",
        14433 | 14444 => "Stratum Mining (SSL)",
        4028 => "CGMiner API",
        8080 | 8081 => "HTTP Proxy/Mining",
        8332 => "Bitcoin RPC",
        8333 => "Bitcoin P2P",
        18332 => "Bitcoin Testnet RPC",
        18333 => "Bitcoin Testnet P2P",
        8545 => "Ethereum RPC",
        8546 => "Ethereum WebSocket",
        30303 => "Ethereum P2P",
        9090 => "Mining Dashboard",
        _ => return None,
    };
    Some(name)
}

/// Generic IANA-style names for everything else a mining host tends to expose.
pub fn detect_service_from_port(port: u16) -> Option<&'static str> {
    let name = match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        80 => "http",
        110 => "pop3",
        143 => "imap",
        443 => "https",
        445 => "microsoft-ds",
        1080 => "socks",
        1194 => "openvpn",
        1723 => "pptp",
        3000 => "http-alt",
        3128 => "squid-http",
        3306 => "mysql",
        3389 => "rdp",
        5432 => "postgresql",
        5900 => "vnc",
        6379 => "redis",
        8000 => "http-alt",
        8443 => "https-alt",
        9100 => "jetdirect",
        27017 => "mongodb",
        _ => return None,
    };
    Some(name)
}

/// Identify a service from what it sent back.
pub fn detect_service_from_banner(banner: &str, port: u16) -> Option<ServiceMatch> {
    let lower = banner.to_lowercase();

    if lower.starts_with("http/") || lower.contains("server:") {
        let service = if port == 443 || port == 8443 { "https" } else { "http" };
        let (product, version) = extract_http_server(&lower);
        return Some(ServiceMatch::new(service).with_details(product, version));
    }

    if lower.starts_with("ssh-") {
        let (product, version) = extract_ssh_info(banner);
        return Some(ServiceMatch::new("ssh").with_details(product, version));
    }

    if lower.starts_with("220") {
        if lower.contains("ftp") {
            return Some(ServiceMatch::new("ftp").with_details(None, extract_version_number(&lower)));
        }
        if lower.contains("smtp") || lower.contains("mail") {
            return Some(ServiceMatch::new("smtp").with_details(None, extract_version_number(&lower)));
        }
    }

    if lower.contains("\"jsonrpc\"") || (lower.contains("\"result\"") && lower.contains("\"id\"")) {
        return Some(ServiceMatch::new("json-rpc"));
    }

    if lower.contains("\"status\"") && lower.contains("cgminer") {
        return Some(ServiceMatch::new("cgminer-api").with_details(None, extract_version_number(&lower)));
    }

    if lower.starts_with("rfb ") {
        return Some(ServiceMatch::new("vnc").with_details(None, lower.get(4..).map(|v| v.trim().to_string())));
    }

    if lower.starts_with("-err") || lower.contains("redis_version") {
        return Some(ServiceMatch::new("redis"));
    }

    None
}

/// Best-effort service label for a port result: mining table, then IANA
/// table, then banner, otherwise [`UNKNOWN_SERVICE`].
pub fn guess_service(port: u16, banner: Option<&str>) -> String {
    if let Some(name) = miner_service_name(port).or_else(|| detect_service_from_port(port)) {
        return name.to_string();
    }
    banner
        .and_then(|b| detect_service_from_banner(b, port))
        .map(|m| m.to_string())
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
}

/// "Server: nginx/1.18.0" → (nginx, 1.18.0)
fn extract_http_server(banner: &str) -> (Option<String>, Option<String>) {
    let Some(idx) = banner.find("server:") else {
        return (None, None);
    };
    let line = banner[idx + "server:".len()..]
        .lines()
        .next()
        .unwrap_or_default()
        .trim();
    match line.split_once('/') {
        Some((product, rest)) => (
            Some(product.trim().to_string()),
            rest.split_whitespace().next().map(str::to_string),
        ),
        None if !line.is_empty() => (Some(line.to_string()), None),
        None => (None, None),
    }
}

/// "SSH-2.0-OpenSSH_8.2p1" → (OpenSSH, 8.2p1)
fn extract_ssh_info(banner: &str) -> (Option<String>, Option<String>) {
    let line = banner.lines().next().unwrap_or_default();
    let software = match line.splitn(3, '-').nth(2) {
        Some(s) => s.split_whitespace().next().unwrap_or_default(),
        None => return (None, None),
    };
    match software.split_once('_') {
        Some((product, version)) => (Some(product.to_string()), Some(version.to_string())),
        None => (Some(software.to_string()), None),
    }
}

fn extract_version_number(text: &str) -> Option<String> {
    static VERSION_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(\d+\.\d+(?:\.\d+)?)").expect("static version regex"));

    VERSION_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
