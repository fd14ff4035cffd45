//! Scan orchestration across an address space

use crate::progress::ProgressTracker;
use minerscope_common::{HostScanResult, ScanStats};
use parking_lot::Mutex;
use minerscope_scanner_tcp::HostScanner;
use minerscope_target_resolver::{estimate_scan_time, AddressSpace};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Hosts scanned at once unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 50;

/// One finished host plus where the run stands.
#[derive(Debug, Clone)]
pub struct ScanUpdate {
    pub completed: u64,
    pub total: u64,
    pub result: HostScanResult,
}

impl ScanUpdate {
    pub fn last_address(&self) -> Ipv4Addr {
        self.result.address
    }
}

/// Drives a [`HostScanner`] over many addresses under a global ceiling.
///
/// Results stream out as each host finishes. Cancellation stops dispatch;
/// hosts already running either finish or return their partial result.
/// A cancelled orchestrator stays cancelled until [`reset`](Self::reset).
pub struct ScanOrchestrator {
    scanner: HostScanner,
    concurrency: usize,
    cancel: Mutex<CancellationToken>,
}

impl ScanOrchestrator {
    pub fn new(scanner: HostScanner, concurrency: usize) -> Self {
        Self {
            scanner,
            concurrency: concurrency.max(1),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Clone of the token the next and current runs observe.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    /// Stop dispatching. Safe to call any number of times.
    pub fn cancel(&self) {
        let token = self.cancel.lock();
        if !token.is_cancelled() {
            info!("Scan cancellation requested");
        }
        token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().is_cancelled()
    }

    /// Arm a fresh token so later runs dispatch again. Runs already holding
    /// the old token are unaffected.
    pub fn reset(&self) {
        let mut token = self.cancel.lock();
        if token.is_cancelled() {
            debug!("Cancellation token replaced");
            *token = CancellationToken::new();
        }
    }

    /// Upper bound on wall time for `host_count` hosts on `port_count` ports.
    pub fn time_bound(&self, host_count: u64, port_count: usize) -> Duration {
        let per_host = self.scanner.options().max_host_duration(port_count);
        estimate_scan_time(host_count, self.concurrency, per_host)
    }

    pub fn scan_space(&self, space: &AddressSpace, ports: &[u16]) -> ScanHandle {
        self.scan_range(space.iter(), space.host_count(), ports)
    }

    /// Start scanning `addresses` in the background.
    ///
    /// The event channel holds twice the concurrency. A host is dispatched
    /// only once its result has a reserved slot, so a consumer that falls
    /// behind holds up further dispatch. Dropping the handle stops dispatch.
    pub fn scan_range<I>(&self, addresses: I, total: u64, ports: &[u16]) -> ScanHandle
    where
        I: IntoIterator<Item = Ipv4Addr>,
        I::IntoIter: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.concurrency.saturating_mul(2));
        let progress = Arc::new(ProgressTracker::new(total));

        let run = DispatchLoop {
            scanner: self.scanner.clone(),
            ports: ports.into(),
            concurrency: self.concurrency,
            cancel: self.cancel_token(),
            progress: Arc::clone(&progress),
            events: tx,
        };
        let task = tokio::spawn(run.run(addresses.into_iter()));

        ScanHandle {
            events: rx,
            task,
            progress,
        }
    }
}

/// A running scan: the result stream and the final statistics.
pub struct ScanHandle {
    events: mpsc::Receiver<ScanUpdate>,
    task: JoinHandle<ScanStats>,
    progress: Arc<ProgressTracker>,
}

impl ScanHandle {
    /// Next finished host, or `None` once every dispatched host is done.
    pub async fn next(&mut self) -> Option<ScanUpdate> {
        self.events.recv().await
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Wait for the run to end. Results not yet taken are discarded and no
    /// further hosts are dispatched.
    pub async fn finish(self) -> ScanStats {
        let Self {
            events,
            task,
            progress,
        } = self;
        drop(events);
        match task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Dispatch loop failed: {}", e);
                progress.snapshot()
            }
        }
    }

    /// Drain every result, then finish.
    pub async fn collect(mut self) -> (Vec<HostScanResult>, ScanStats) {
        let mut results = Vec::new();
        while let Some(update) = self.next().await {
            results.push(update.result);
        }
        (results, self.finish().await)
    }
}

struct DispatchLoop {
    scanner: HostScanner,
    ports: Arc<[u16]>,
    concurrency: usize,
    cancel: CancellationToken,
    progress: Arc<ProgressTracker>,
    events: mpsc::Sender<ScanUpdate>,
}

impl DispatchLoop {
    #[instrument(skip_all)]
    async fn run<I>(self, addresses: I) -> ScanStats
    where
        I: Iterator<Item = Ipv4Addr> + Send,
    {
        let total = self.progress.total();
        info!(
            "Scanning {} host(s) on {} port(s), {} at a time",
            total,
            self.ports.len(),
            self.concurrency
        );

        let slots = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut dispatched: u64 = 0;

        for address in addresses {
            let reserved = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                reserved = self.events.clone().reserve_owned() => match reserved {
                    Ok(reserved) => reserved,
                    Err(_) => {
                        debug!("Result receiver gone; stopping dispatch");
                        break;
                    }
                },
            };
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            while let Some(joined) = tasks.try_join_next() {
                reap(joined);
            }

            dispatched += 1;
            let scanner = self.scanner.clone();
            let ports = Arc::clone(&self.ports);
            let cancel = self.cancel.clone();
            let progress = Arc::clone(&self.progress);

            tasks.spawn(async move {
                let result = scan_isolated(scanner, address, ports, cancel).await;
                drop(permit);

                if let Some(error) = result.scan_error.as_deref().filter(|_| result.is_failed()) {
                    warn!("Host {} failed: {}", address, error);
                }
                let completed = progress.record(&result);
                let update = ScanUpdate {
                    completed,
                    total: progress.total(),
                    result,
                };
                reserved.send(update);
            });
        }

        if self.cancel.is_cancelled() {
            info!("Dispatch stopped after {} of {} host(s)", dispatched, total);
        }

        drop(self.events);
        while let Some(joined) = tasks.join_next().await {
            reap(joined);
        }

        self.progress.log_summary();
        self.progress.snapshot()
    }
}

/// Run one host scan on its own task so a panic becomes a failed result.
async fn scan_isolated(
    scanner: HostScanner,
    address: Ipv4Addr,
    ports: Arc<[u16]>,
    cancel: CancellationToken,
) -> HostScanResult {
    let inner = tokio::spawn(async move { scanner.scan(address, &ports, &cancel).await });
    match inner.await {
        Ok(result) => result,
        Err(e) => HostScanResult::failed(address, format!("scan task failed: {}", e)),
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        warn!("Host task failed: {}", e);
    }
}
