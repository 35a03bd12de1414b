use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "netoflow",
    version,
    about = "Per-flow IPv4 traffic accounting with local/remote classification"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Capture live traffic and publish a snapshot every refresh interval
    Capture(CaptureArgs),
    /// Ingest recorded packet descriptors and publish one snapshot
    Replay(ReplayArgs),
}

/// Arguments shared by every mode that accounts traffic.
#[derive(Args, Debug, Clone, Default)]
pub struct AccountingArgs {
    /// JSON config file with local_networks, local_ips and refresh_secs
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Local networks in CIDR notation, comma separated (replaces the RFC 1918 defaults)
    #[arg(long, value_delimiter = ',')]
    pub local_networks: Option<Vec<String>>,

    /// Local host addresses, comma separated (a.b.c.d or a.b.c.d/n)
    #[arg(long, value_delimiter = ',')]
    pub local_ips: Option<Vec<String>>,

    /// Snapshot refresh interval in seconds [default: 5]
    #[arg(long, value_parser = validate_refresh)]
    pub refresh: Option<u64>,

    /// Output format [default: prometheus]
    #[arg(long, default_value = "prometheus")]
    pub format: OutputFormat,

    /// Write snapshots to this file (atomically replaced) instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Arguments specific to live capture.
#[derive(Args, Debug, Clone)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub accounting: AccountingArgs,

    /// Interface to capture on; repeat for several, omit or use `any` for all.
    /// Only Ethernet-framed links are decoded (not tun, wireguard or ppp)
    #[arg(long)]
    pub interface: Vec<String>,

    /// Bytes copied per frame [default: 1500]
    #[arg(long, default_value_t = 1500, value_parser = validate_snaplen)]
    pub snaplen: u32,

    /// Put the interfaces into promiscuous mode
    #[arg(long)]
    pub promisc: bool,
}

/// Arguments specific to replay.
#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub accounting: AccountingArgs,

    /// Descriptor file to ingest, `-` for stdin
    pub input: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Prometheus,
    Json,
    Tsv,
}

pub const MIN_REFRESH_SECS: u64 = 1;
pub const MAX_REFRESH_SECS: u64 = 3600;

fn validate_refresh(s: &str) -> Result<u64, String> {
    let val: u64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid integer"))?;
    if val < MIN_REFRESH_SECS {
        Err(format!("refresh must be at least {MIN_REFRESH_SECS} second"))
    } else if val > MAX_REFRESH_SECS {
        Err(format!("refresh must be at most {MAX_REFRESH_SECS} seconds"))
    } else {
        Ok(val)
    }
}

fn validate_snaplen(s: &str) -> Result<u32, String> {
    let val: u32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid integer"))?;
    if val < 64 {
        Err("snaplen must be at least 64 bytes".to_string())
    } else if val > 65535 {
        Err("snaplen must be at most 65535 bytes".to_string())
    } else {
        Ok(val)
    }
}

impl Command {
    pub fn accounting(&self) -> &AccountingArgs {
        match self {
            Command::Capture(c) => &c.accounting,
            Command::Replay(r) => &r.accounting,
        }
    }
}
