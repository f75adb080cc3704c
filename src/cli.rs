use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Built-in per-chunk transforms for the CLI front end.
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum CountMode {
    Bytes,
    Words,
    Lines,
}

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct CliOptions {
    /// Input file to process
    #[arg(short, long)]
    pub input: PathBuf,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Number of worker threads (0 = one per logical CPU)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Minimum chunk size, in KiB
    #[arg(long)]
    pub min_chunk_kib: Option<u64>,

    /// Maximum chunk size, in KiB
    #[arg(long)]
    pub max_chunk_kib: Option<u64>,

    /// Fraction of available memory the job may target (0 < f <= 1)
    #[arg(long)]
    pub memory_fraction: Option<f64>,

    /// Status monitor cadence, in milliseconds
    #[arg(long)]
    pub monitor_interval_ms: Option<u64>,

    /// Per-chunk transform to run
    #[arg(long, value_enum, default_value_t = CountMode::Words)]
    pub mode: CountMode,

    /// Print final job stats as JSON on stdout
    #[arg(long)]
    pub json_stats: bool,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
