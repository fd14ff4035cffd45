use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minerscope")]
#[command(version)]
#[command(about = "Find hosts exposing cryptocurrency-mining services", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan targets, classify and geolocate responsive hosts
    Scan(ScanArgs),
    /// Print host count and worst-case scan time without sending traffic
    Estimate(EstimateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Targets: IP, CIDR, START-END range or a comma list of those
    #[arg(short = 't', long, required = true)]
    pub targets: String,

    /// Ports, e.g. 3333,4444 or 8000-8100. Defaults to the miner port catalogue
    #[arg(short, long)]
    pub ports: Option<String>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Hosts scanned at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Skip the ICMP reachability check
    #[arg(long)]
    pub no_ping: bool,

    /// Connect only, never read banners
    #[arg(long)]
    pub no_banner: bool,

    /// Skip geolocation (and therefore the region filter)
    #[arg(long)]
    pub no_geo: bool,

    /// Keep hosts wherever they geolocate
    #[arg(long)]
    pub all_regions: bool,

    /// YAML detection rules replacing the built-in set
    #[arg(long)]
    pub rules: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct EstimateArgs {
    #[arg(short = 't', long, required = true)]
    pub targets: String,

    #[arg(short, long)]
    pub ports: Option<String>,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(short, long)]
    pub concurrency: Option<usize>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Table after the run
    Text,
    /// One JSON object per line as hosts are kept
    Json,
}
