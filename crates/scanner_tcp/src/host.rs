//! Per-host scan: ping, reverse DNS and a bounded fan-out of port probes

use minerscope_common::{
    HostScanResult, HostnameResolver, PingOutcome, Pinger, PortProber, PortResult, ProbeOptions,
    ScanConfig,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct HostScanOptions {
    pub probe: ProbeOptions,
    pub ping_enabled: bool,
    pub ping_timeout: Duration,
    pub hostname_timeout: Duration,
    /// Probes in flight against one host at a time.
    pub per_host_concurrency: usize,
}

impl Default for HostScanOptions {
    fn default() -> Self {
        Self::from(&ScanConfig::default())
    }
}

impl From<&ScanConfig> for HostScanOptions {
    fn from(config: &ScanConfig) -> Self {
        Self {
            probe: config.probe_options(),
            ping_enabled: config.ping_enabled,
            ping_timeout: Duration::from_millis(config.ping_timeout_ms),
            hostname_timeout: Duration::from_millis(config.hostname_timeout_ms),
            per_host_concurrency: config.per_host_concurrency.max(1),
        }
    }
}

impl HostScanOptions {
    /// Worst-case wall time of one host scan, used for time estimates.
    pub fn max_host_duration(&self, port_count: usize) -> Duration {
        let per_port = self.probe.connect_timeout
            + if self.probe.grab_banner {
                self.probe.banner_timeout
            } else {
                Duration::ZERO
            };
        let waves = port_count.div_ceil(self.per_host_concurrency.max(1)).max(1) as u32;
        let probes = per_port.saturating_mul(waves);
        let side = if self.ping_enabled {
            self.ping_timeout.max(self.hostname_timeout)
        } else {
            self.hostname_timeout
        };
        probes.max(side)
    }
}

/// Scans one address at a time. Cheap to clone; collaborators are shared.
#[derive(Clone)]
pub struct HostScanner {
    prober: Arc<dyn PortProber>,
    pinger: Option<Arc<dyn Pinger>>,
    resolver: Option<Arc<dyn HostnameResolver>>,
    options: HostScanOptions,
}

impl HostScanner {
    pub fn new(prober: Arc<dyn PortProber>, options: HostScanOptions) -> Self {
        Self {
            prober,
            pinger: None,
            resolver: None,
            options,
        }
    }

    pub fn with_pinger(mut self, pinger: Arc<dyn Pinger>) -> Self {
        self.pinger = Some(pinger);
        self
    }

    pub fn with_hostname_resolver(mut self, resolver: Arc<dyn HostnameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn options(&self) -> &HostScanOptions {
        &self.options
    }

    /// Scan `address` on `ports`.
    ///
    /// Ping and reverse DNS run alongside the probes. Cancellation is checked
    /// before each probe is dispatched; probes already in flight finish and
    /// the partial result comes back tagged as cancelled.
    #[instrument(skip(self, ports, cancel), fields(port_count = ports.len()))]
    pub async fn scan(
        &self,
        address: Ipv4Addr,
        ports: &[u16],
        cancel: &CancellationToken,
    ) -> HostScanResult {
        if cancel.is_cancelled() {
            return HostScanResult::cancelled(address);
        }

        let (ping, hostname, (ports, cancelled)) = tokio::join!(
            self.ping(address),
            self.reverse(address),
            self.probe_ports(address, ports, cancel),
        );

        let mut result = HostScanResult::new(address);
        result.set_ports(ports);
        result.hostname = hostname;
        if let PingOutcome::Reply(rtt) = ping {
            result.ping_ms = Some(rtt.as_secs_f64() * 1000.0);
        }
        result.reachable = result.ping_ms.is_some() || result.has_open_ports();
        if cancelled {
            result.mark_cancelled();
        }

        debug!(
            "{}: reachable={} open={:?}",
            address,
            result.reachable,
            result.open_ports()
        );
        result
    }

    async fn ping(&self, address: Ipv4Addr) -> PingOutcome {
        let pinger = match (&self.pinger, self.options.ping_enabled) {
            (Some(pinger), true) => pinger,
            _ => return PingOutcome::Unavailable,
        };
        let wait = self.options.ping_timeout;
        timeout(wait, pinger.ping(address, wait))
            .await
            .unwrap_or(PingOutcome::NoReply)
    }

    async fn reverse(&self, address: Ipv4Addr) -> Option<String> {
        let resolver = self.resolver.as_ref()?;
        timeout(self.options.hostname_timeout, resolver.reverse(address))
            .await
            .ok()
            .flatten()
    }

    async fn probe_ports(
        &self,
        address: Ipv4Addr,
        ports: &[u16],
        cancel: &CancellationToken,
    ) -> (Vec<PortResult>, bool) {
        let limit = Arc::new(Semaphore::new(self.options.per_host_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut cancelled = false;

        for &port in ports {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let prober = Arc::clone(&self.prober);
            let options = self.options.probe;
            tasks.spawn(async move {
                let result = prober.probe(address, port, &options).await;
                drop(permit);
                result
            });
        }

        let mut results = Vec::with_capacity(ports.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("probe task for {} failed: {}", address, e),
            }
        }
        (results, cancelled)
    }
}
