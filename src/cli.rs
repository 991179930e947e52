use clap::Parser;
use std::path::PathBuf;

/// extractor: windowed traffic feature extraction from pcap captures
#[derive(Parser, Debug)]
#[command(name = "extractor", version, about)]
pub struct Cli {
    /// Input capture file (classic pcap; pcapng must be converted upstream)
    pub input: PathBuf,

    /// Output file: a JSON array of per-window records
    pub output: PathBuf,

    /// Window duration in seconds
    #[arg(long)]
    pub window_seconds: Option<f64>,

    /// Number of largest flows (by bytes) to keep per window
    #[arg(long)]
    pub top_k_flows: Option<u32>,

    /// Number of busiest destination ports to keep per window
    #[arg(long)]
    pub top_k_ports: Option<u32>,

    /// TOML configuration file; CLI flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Also write the engineered behavioral feature rows to this file
    #[arg(long)]
    pub features_out: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
