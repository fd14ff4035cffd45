//! Fingerprint tables for miner detection
//!
//! - Port-based and banner-based service naming
//! - Miner signatures matched against grabbed banners
//! - The lightweight open-port heuristic
//! - Payloads sent to coax a banner out of quiet services

mod probes;
mod service_detector;
mod signatures;

pub use probes::{probe_for_port, ProbeKind};
pub use service_detector::{
    detect_service_from_banner, detect_service_from_port, guess_service, miner_service_name,
    ServiceMatch, UNKNOWN_SERVICE,
};
pub use signatures::{
    detect_miner_from_banner, detect_miner_heuristic, HeuristicMatch, HEURISTIC_CONFIDENCE,
};
