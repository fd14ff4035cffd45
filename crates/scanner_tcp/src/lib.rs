//! TCP connect scanning for a single host
//!
//! [`TcpPortProber`] probes one port, [`HostScanner`] fans probes out across a
//! port list alongside ping and reverse DNS and folds everything into a
//! [`HostScanResult`](minerscope_common::HostScanResult).

mod banner;
mod host;
mod hostname;
mod ping;
mod probe;

pub use banner::BannerGrabber;
pub use host::{HostScanOptions, HostScanner};
pub use hostname::DnsHostnameResolver;
pub use ping::SystemPinger;
pub use probe::TcpPortProber;
