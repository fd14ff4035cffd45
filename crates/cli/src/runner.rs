use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::args::{EstimateArgs, OutputFormat, ScanArgs};
use crate::output::{print_table, stream_events};
use minerscope_common::{MemoryScanStore, MinerScopeConfig};
use minerscope_geo::{GeoResolver, MemoryGeoCache};
use minerscope_orchestrator::{DetectionPipeline, ScanOrchestrator};
use minerscope_rules::{DetectionRuleEngine, YamlRuleFile};
use minerscope_scanner_tcp::{
    DnsHostnameResolver, HostScanOptions, HostScanner, SystemPinger, TcpPortProber,
};
use minerscope_target_resolver::{parse_ports, AddressSpace};

pub async fn run_scan(args: ScanArgs) -> Result<()> {
    let config = scan_config(&args)?;
    let space = AddressSpace::parse(&args.targets)?;
    let ports = resolve_ports(args.ports.as_deref(), &config)?;
    let engine = load_engine(args.rules.as_deref().or(config.rules.path.as_deref()))?;

    info!("Targets: {} ({} host(s))", args.targets, space.host_count());
    info!("Ports: {} port(s)", ports.len());
    info!("Concurrency: {}", config.scan.max_concurrent);

    let options = HostScanOptions::from(&config.scan);
    let mut scanner = HostScanner::new(Arc::new(TcpPortProber::new()), options)
        .with_hostname_resolver(Arc::new(DnsHostnameResolver::new()));
    if options.ping_enabled {
        scanner = scanner.with_pinger(Arc::new(SystemPinger::new()));
    }
    let orchestrator = ScanOrchestrator::new(scanner, config.scan.max_concurrent);
    info!(
        "Worst-case duration: {:?}",
        orchestrator.time_bound(space.host_count(), ports.len())
    );

    let store = Arc::new(MemoryScanStore::new());
    let mut pipeline = DetectionPipeline::new(orchestrator, Arc::new(engine), store.clone())
        .with_threshold(config.rules.confidence_threshold);

    let geo = &config.geolocation;
    if geo.enabled && !args.no_geo {
        let resolver = GeoResolver::from_config(geo, Arc::new(MemoryGeoCache::new()))?;
        pipeline = pipeline.with_geolocation(Arc::new(resolver));
        if geo.region_filter && !args.all_regions {
            pipeline = pipeline.with_region(geo.region);
        }
    } else {
        info!("Geolocation disabled; region filter off");
    }

    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; letting in-flight hosts finish");
            cancel.cancel();
        }
    });

    let printer = tokio::spawn(stream_events(pipeline.subscribe(), args.format));

    let scan_start = Instant::now();
    let record = pipeline
        .run_space("cli", &args.targets, &space, &ports)
        .await?;
    let scan_duration = scan_start.elapsed();
    // closes the event stream
    drop(pipeline);
    if let Err(e) = printer.await {
        warn!("Event printer failed: {}", e);
    }

    if args.format == OutputFormat::Text {
        let hosts = store.host_results(record.id).await;
        print_table(&record, &hosts, scan_duration);
    }
    Ok(())
}

pub fn estimate(args: EstimateArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(concurrency) = args.concurrency {
        config.scan.max_concurrent = concurrency;
    }
    config.validate()?;

    let space = AddressSpace::parse(&args.targets)?;
    let ports = resolve_ports(args.ports.as_deref(), &config)?;
    let per_host = HostScanOptions::from(&config.scan).max_host_duration(ports.len());
    let total = space.estimate_scan_time(config.scan.max_concurrent, per_host);

    println!("Hosts:          {}", space.host_count());
    println!("Ports per host: {}", ports.len());
    println!("Concurrency:    {}", config.scan.max_concurrent);
    println!("Per-host bound: {:?}", per_host);
    println!("Worst case:     {:?}", total);
    let preview = space.first_n(5);
    if !preview.is_empty() {
        let shown: Vec<String> = preview.iter().map(|a| a.to_string()).collect();
        println!("First hosts:    {}", shown.join(", "));
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<MinerScopeConfig> {
    let mut config = match path {
        Some(path) => MinerScopeConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MinerScopeConfig::default(),
    };
    config.apply_env();
    Ok(config)
}

/// Config file, then environment, then command-line flags.
fn scan_config(args: &ScanArgs) -> Result<MinerScopeConfig> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(concurrency) = args.concurrency {
        config.scan.max_concurrent = concurrency;
    }
    if args.no_ping {
        config.scan.ping_enabled = false;
    }
    if args.no_banner {
        config.scan.banner_grab_enabled = false;
    }
    config.validate()?;
    Ok(config)
}

fn resolve_ports(spec: Option<&str>, config: &MinerScopeConfig) -> Result<Vec<u16>> {
    Ok(match spec {
        Some(spec) => parse_ports(spec)?,
        None => config.miner_ports.all_ports(),
    })
}

fn load_engine(rules: Option<&Path>) -> Result<DetectionRuleEngine> {
    let engine = match rules {
        Some(path) => DetectionRuleEngine::from_source(&YamlRuleFile::new(path))?,
        None => DetectionRuleEngine::with_default_rules()?,
    };
    info!(
        "Loaded {} rule(s), {} enabled",
        engine.rules().len(),
        engine.enabled_rules().len()
    );
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scan_args(targets: &str) -> ScanArgs {
        ScanArgs {
            targets: targets.to_string(),
            ports: None,
            config: None,
            concurrency: None,
            no_ping: false,
            no_banner: false,
            no_geo: true,
            all_regions: false,
            rules: None,
            format: OutputFormat::Text,
        }
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scan]\nmax_concurrent = 10\nping_enabled = true").unwrap();

        let mut args = scan_args("10.0.0.1");
        args.config = Some(file.path().to_path_buf());
        args.concurrency = Some(3);
        args.no_ping = true;
        args.no_banner = true;

        let config = scan_config(&args).unwrap();
        assert_eq!(config.scan.max_concurrent, 3);
        assert!(!config.scan.ping_enabled);
        assert!(!config.scan.banner_grab_enabled);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut args = scan_args("10.0.0.1");
        args.concurrency = Some(0);
        assert!(scan_config(&args).is_err());
    }

    #[test]
    fn test_default_ports_are_miner_catalogue() {
        let config = MinerScopeConfig::default();
        let ports = resolve_ports(None, &config).unwrap();
        assert!(ports.contains(&3333) && ports.contains(&8545));
        assert!(ports.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(resolve_ports(Some("80,443"), &config).unwrap(), vec![80, 443]);
        assert!(resolve_ports(Some("80-"), &config).is_err());
    }

    #[test]
    fn test_missing_rules_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let engine = load_engine(Some(&dir.path().join("absent.yaml"))).unwrap();
        assert_eq!(engine.rules().len(), 9);
    }

    #[test]
    fn test_estimate_rejects_bad_targets() {
        let args = EstimateArgs {
            targets: "10.0.0.0/33".to_string(),
            ports: None,
            config: None,
            concurrency: None,
        };
        assert!(estimate(args).is_err());
    }
}
