//! Orchestrator - drives host scans over an address space and feeds each
//! result through classification, geolocation and persistence

mod orchestrator;
mod pipeline;
mod progress;

pub use orchestrator::{ScanHandle, ScanOrchestrator, ScanUpdate, DEFAULT_CONCURRENCY};
pub use pipeline::{DetectionEvent, DetectionPipeline};
pub use progress::ProgressTracker;
