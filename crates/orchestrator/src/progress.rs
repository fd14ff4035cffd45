//! Progress tracking

use minerscope_common::{HostScanResult, ScanStats};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::info;

/// Running totals for one scan, shared by every in-flight host task.
pub struct ProgressTracker {
    stats: Mutex<ScanStats>,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total_hosts: u64) -> Self {
        Self {
            stats: Mutex::new(ScanStats::new(total_hosts)),
            started: Instant::now(),
        }
    }

    /// Fold one finished host in; returns the completed count including it.
    pub fn record(&self, result: &HostScanResult) -> u64 {
        let mut stats = self.stats.lock();
        stats.update(result);
        stats.scanned
    }

    pub fn total(&self) -> u64 {
        self.stats.lock().total_hosts
    }

    pub fn completed(&self) -> u64 {
        self.stats.lock().scanned
    }

    pub fn snapshot(&self) -> ScanStats {
        let mut stats = self.stats.lock().clone();
        stats.elapsed = self.started.elapsed();
        stats
    }

    pub fn log_summary(&self) {
        let stats = self.snapshot();

        info!("Scan Summary:");
        info!("  Total hosts: {}", stats.total_hosts);
        info!("  Scanned: {}", stats.scanned);
        info!("  Reachable: {}", stats.reachable);
        info!("  Open ports: {}", stats.open_ports);
        info!("  Cancelled: {}", stats.cancelled);
        info!("  Failed: {}", stats.failed);
        info!(
            "  Elapsed: {:.1}s ({:.1} hosts/s)",
            stats.elapsed.as_secs_f64(),
            stats.rate()
        );
    }
}
