//! Output formatting for detection results

use anyhow::Result;
use minerscope_common::{GeoRecord, HostRecord, ScanRecord};
use minerscope_orchestrator::DetectionEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::args::OutputFormat;

/// Follow the pipeline's events until it goes away. JSON mode prints kept
/// hosts and the final record as they happen; text mode only logs.
pub async fn stream_events(mut events: mpsc::Receiver<DetectionEvent>, format: OutputFormat) {
    while let Some(event) = events.recv().await {
        if format == OutputFormat::Json {
            if let Err(e) = print_json_line(&event) {
                warn!("Could not encode event: {}", e);
            }
        } else {
            log_event(&event);
        }
    }
}

fn print_json_line(event: &DetectionEvent) -> Result<()> {
    if matches!(event, DetectionEvent::Progress { .. }) {
        return Ok(());
    }
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

fn log_event(event: &DetectionEvent) {
    match event {
        DetectionEvent::Progress {
            completed, total, ..
        } => {
            if *total > 0 && (completed * 10 / total) != ((completed - 1) * 10 / total) {
                info!("Progress: {}/{}", completed, total);
            }
        }
        DetectionEvent::Host(host) if host.classification.is_miner => info!(
            "Miner candidate {} ({:.0}%)",
            host.scan.address,
            host.classification.confidence * 100.0
        ),
        _ => {}
    }
}

/// Print kept hosts as an ASCII table (sorted by address) and the totals.
pub fn print_table(record: &ScanRecord, hosts: &[HostRecord], scan_duration: Duration) {
    let mut sorted: Vec<&HostRecord> = hosts.iter().collect();
    sorted.sort_by_key(|h| h.scan.address);

    if sorted.is_empty() {
        println!("\nNo hosts to display.");
    } else {
        println!("\n{:-<100}", "");
        println!(
            "{:<16} {:<28} {:<12} {:<6} {:<36}",
            "HOST", "OPEN PORTS", "MINER", "CONF", "LOCATION"
        );
        println!("{:-<100}", "");
        for host in sorted {
            let miner = match (host.classification.is_miner, host.classification.miner_type) {
                (true, Some(kind)) => kind.to_string(),
                (true, None) => "yes".to_string(),
                (false, _) => "-".to_string(),
            };
            println!(
                "{:<16} {:<28} {:<12} {:<6} {:<36}",
                host.scan.address.to_string(),
                truncate(&format_ports(host), 28),
                miner,
                format!("{:.0}%", host.classification.confidence * 100.0),
                truncate(&format_location(host), 36)
            );
        }
        println!("{:-<100}", "");
    }

    println!("\nSummary ({}):", record.status);
    println!("  Hosts scanned: {}/{}", record.scanned_hosts, record.total_hosts);
    println!("  Responsive: {}", record.responsive_hosts);
    println!("  Miners detected: {}", record.miners_detected);
    println!("  Failed: {}", record.failed_hosts);
    println!("  Outside region: {}", record.out_of_region);
    println!("  Geolocation failures: {}", record.geo_failures);
    println!("  Scan duration: {}", format_duration(scan_duration));
    println!();
}

fn format_ports(host: &HostRecord) -> String {
    let ports: Vec<String> = host.scan.ports.iter().map(|p| p.port.to_string()).collect();
    ports.join(",")
}

fn format_location(host: &HostRecord) -> String {
    match (&host.geo, &host.geo_error) {
        (Some(geo), _) => describe_geo(geo),
        (None, Some(error)) => format!("({})", error),
        (None, None) => "-".to_string(),
    }
}

fn describe_geo(geo: &GeoRecord) -> String {
    let parts: Vec<&str> = [&geo.city, &geo.region, &geo.country]
        .into_iter()
        .filter_map(|p| p.as_deref())
        .collect();
    if parts.is_empty() {
        match geo.coordinates() {
            Some((lat, lon)) => format!("{:.3},{:.3}", lat, lon),
            None => "unknown".to_string(),
        }
    } else {
        parts.join(", ")
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let cut: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Format duration in a human-readable way
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis > 0 {
            format!("{}.{:03}s", total_secs, millis)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    }
}
