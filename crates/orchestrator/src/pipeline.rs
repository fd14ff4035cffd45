//! End-to-end detection run
//!
//! Scan → classify → geolocate → region filter → persist, one host at a time
//! as results stream in from the [`ScanOrchestrator`].

use crate::orchestrator::{ScanOrchestrator, ScanUpdate};
use chrono::Utc;
use minerscope_common::{
    BoundingBox, GeoRecord, HostRecord, HostScanResult, MinerScopeResult, ScanRecord, ScanStatus,
    ScanStore,
};
use minerscope_geo::{record_in_region, GeoResolver, ResolutionFailure};
use minerscope_rules::{DetectionRuleEngine, DEFAULT_CONFIDENCE_THRESHOLD};
use minerscope_target_resolver::AddressSpace;
use parking_lot::Mutex;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Per-subscriber event buffer.
const EVENT_BUFFER: usize = 64;

/// What subscribers see while a run is in progress.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DetectionEvent {
    Progress {
        completed: u64,
        total: u64,
        address: Ipv4Addr,
    },
    /// A host was kept and written to the store.
    Host(HostRecord),
    Finished(ScanRecord),
}

/// Where one host ended up.
enum Disposition {
    Skipped,
    OutOfRegion,
    Recorded(Box<HostRecord>),
}

pub struct DetectionPipeline {
    orchestrator: ScanOrchestrator,
    engine: Arc<DetectionRuleEngine>,
    store: Arc<dyn ScanStore>,
    geo: Option<Arc<GeoResolver>>,
    region: Option<BoundingBox>,
    threshold: f64,
    subscribers: Mutex<Vec<mpsc::Sender<DetectionEvent>>>,
}

impl DetectionPipeline {
    pub fn new(
        orchestrator: ScanOrchestrator,
        engine: Arc<DetectionRuleEngine>,
        store: Arc<dyn ScanStore>,
    ) -> Self {
        Self {
            orchestrator,
            engine,
            store,
            geo: None,
            region: None,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_geolocation(mut self, resolver: Arc<GeoResolver>) -> Self {
        self.geo = Some(resolver);
        self
    }

    /// Keep only hosts that geolocate inside `region`. Has no effect without
    /// a resolver.
    pub fn with_region(mut self, region: BoundingBox) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Events from now on. The stream ends when the pipeline is dropped.
    ///
    /// Host and finish events are never dropped: a subscriber that stops
    /// reading stalls the run. Progress events are skipped while the
    /// subscriber's buffer is full.
    pub fn subscribe(&self) -> mpsc::Receiver<DetectionEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn orchestrator(&self) -> &ScanOrchestrator {
        &self.orchestrator
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.orchestrator.cancel_token()
    }

    pub fn cancel(&self) {
        self.orchestrator.cancel();
    }

    /// Parse `targets`, then run. Malformed input fails before any traffic.
    pub async fn run(&self, name: &str, targets: &str, ports: &[u16]) -> MinerScopeResult<ScanRecord> {
        let space = AddressSpace::parse(targets)?;
        self.run_space(name, targets, &space, ports).await
    }

    /// Scan `space` and persist every kept host; returns the finalized record.
    #[instrument(skip(self, space, ports), fields(hosts = space.host_count()))]
    pub async fn run_space(
        &self,
        name: &str,
        target_spec: &str,
        space: &AddressSpace,
        ports: &[u16],
    ) -> MinerScopeResult<ScanRecord> {
        let mut record = ScanRecord::new(name, target_spec, space.host_count());
        record.status = ScanStatus::Running;
        record.id = self.store.create_scan_record(record.clone()).await?;
        info!("Scan {} started: {} host(s)", record.id, record.total_hosts);

        let cancel = self.orchestrator.cancel_token();
        let mut handle = self.orchestrator.scan_space(space, ports);

        while let Some(update) = handle.next().await {
            self.publish(DetectionEvent::Progress {
                completed: update.completed,
                total: update.total,
                address: update.last_address(),
            })
            .await;
            self.handle_host(&mut record, update, &cancel).await;
        }
        let stats = handle.finish().await;

        record.finished_at = Some(Utc::now());
        record.status = if cancel.is_cancelled() {
            ScanStatus::Cancelled
        } else {
            ScanStatus::Completed
        };
        self.store.finalize_scan_record(&record).await?;

        info!(
            "Scan {} {}: {}/{} scanned, {} responsive, {} miner(s), {} failed, {} out of region, {} geo failure(s) in {:.1}s",
            record.id,
            record.status,
            record.scanned_hosts,
            record.total_hosts,
            record.responsive_hosts,
            record.miners_detected,
            record.failed_hosts,
            record.out_of_region,
            record.geo_failures,
            stats.elapsed.as_secs_f64()
        );
        self.publish(DetectionEvent::Finished(record.clone())).await;
        Ok(record)
    }

    async fn handle_host(
        &self,
        record: &mut ScanRecord,
        update: ScanUpdate,
        cancel: &CancellationToken,
    ) {
        let host = update.result;
        record.scanned_hosts += 1;
        if host.is_failed() {
            record.failed_hosts += 1;
        }
        if host.reachable {
            record.responsive_hosts += 1;
        }

        match self.assess(record, host, cancel).await {
            Disposition::Skipped => {}
            Disposition::OutOfRegion => record.out_of_region += 1,
            Disposition::Recorded(host) => {
                if let Err(e) = self.store.append_host_result(&host).await {
                    warn!("Could not store {}: {}", host.scan.address, e);
                    return;
                }
                if host.classification.is_miner {
                    record.miners_detected += 1;
                }
                self.publish(DetectionEvent::Host(*host)).await;
            }
        }
    }

    /// Hosts with nothing open are counted but not kept.
    async fn assess(
        &self,
        record: &mut ScanRecord,
        host: HostScanResult,
        cancel: &CancellationToken,
    ) -> Disposition {
        if !host.reachable || !host.has_open_ports() {
            return Disposition::Skipped;
        }

        let classification = self.engine.classify(&host, self.threshold);
        let (geo, geo_error) = match self.locate(host.address, cancel).await {
            Some(Ok(geo)) => (Some(geo), None),
            Some(Err(failure)) => {
                if counts_as_geo_failure(&failure) {
                    record.geo_failures += 1;
                }
                (None, Some(failure.to_string()))
            }
            None => (None, None),
        };

        if let (Some(region), Some(geo)) = (&self.region, &geo) {
            if !record_in_region(geo, region) {
                debug!("Skipping {}: outside region", host.address);
                return Disposition::OutOfRegion;
            }
        }

        Disposition::Recorded(Box::new(HostRecord {
            scan_id: record.id,
            scan: host,
            classification,
            geo,
            geo_error,
        }))
    }

    async fn locate(
        &self,
        address: Ipv4Addr,
        cancel: &CancellationToken,
    ) -> Option<Result<GeoRecord, ResolutionFailure>> {
        let resolver = self.geo.as_ref()?;
        let outcome = resolver.resolve_with_cancel(address, cancel).await;
        if let Err(e) = &outcome {
            debug!("No location for {}: {}", address, e);
        }
        Some(outcome)
    }

    async fn publish(&self, event: DetectionEvent) {
        let subscribers = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|tx| !tx.is_closed());
            subscribers.clone()
        };

        for tx in subscribers {
            if let DetectionEvent::Progress { .. } = event {
                if let Err(TrySendError::Full(_)) = tx.try_send(event.clone()) {
                    debug!("Subscriber busy; progress update skipped");
                }
            } else if tx.send(event.clone()).await.is_err() {
                debug!("Subscriber went away");
            }
        }
    }
}

/// Local addresses and cancellation are expected outcomes, not failures.
fn counts_as_geo_failure(failure: &ResolutionFailure) -> bool {
    !matches!(
        failure,
        ResolutionFailure::LocalAddress | ResolutionFailure::Cancelled
    )
}
