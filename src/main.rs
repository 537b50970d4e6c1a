use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::error;

use hicbin::config::{BinConfig, Normalization};
use hicbin::pipeline::{self, Outcome};
use hicbin::utils::Compression;

/// Extract binned interaction matrices from filtered Hi-C read pairs.
#[derive(Parser, Debug)]
#[command(name = "hicbin", version, about)]
struct Cli {
    /// Working directory holding the job ledger and pipeline outputs.
    #[arg(short, long)]
    workdir: PathBuf,

    /// Matrix resolution in base pairs.
    #[arg(short, long)]
    resolution: u64,

    /// Reads input (BAM or 4DN pairs), bypassing ledger provenance.
    #[arg(long)]
    bam: Option<PathBuf>,

    /// Bias file to use instead of the one recorded in the ledger.
    #[arg(long)]
    biases: Option<PathBuf>,

    /// Upstream job id to resolve inputs from.
    #[arg(short, long)]
    jobid: Option<i64>,

    /// Primary region, `chrom` or `chrom:start-end`.
    #[arg(short = 'c', long = "coord")]
    coord: Option<String>,

    /// Secondary region for an inter-region matrix.
    #[arg(short = 'C', long = "coord2")]
    coord2: Option<String>,

    /// Normalizations to extract (raw, norm, decay); repeatable.
    #[arg(long = "norm", value_name = "NORM")]
    norm: Vec<Normalization>,

    /// Read filter codes to exclude (1..=10); repeatable.
    #[arg(short = 'F', long = "filter", value_name = "CODE")]
    filter: Vec<u8>,

    /// Input holds only valid pairs; skip filtering.
    #[arg(long)]
    valid: bool,

    /// Worker pool size; 0 uses all available cores.
    #[arg(long, default_value_t = 0)]
    cpus: usize,

    /// Number of scan chunks; 0 picks one per worker.
    #[arg(long, default_value_t = 0)]
    nchunks: usize,

    /// Write the matrix text output even with --only-plot.
    #[arg(long)]
    matrix: bool,

    /// Render a heatmap figure per normalization.
    #[arg(long)]
    plot: bool,

    /// Skip the matrix text output.
    #[arg(long = "only-plot")]
    only_plot: bool,

    /// Color map recorded for the figure renderer.
    #[arg(long, default_value = "gray")]
    cmap: String,

    /// Figure file format.
    #[arg(long, default_value = "pgm")]
    format: String,

    /// Compress the matrix text output (gzip).
    #[arg(long)]
    compression: Option<Compression>,

    /// Repeat the run even when an identical one is already registered.
    #[arg(long)]
    force: bool,

    /// Log errors only.
    #[arg(short, long)]
    quiet: bool,

    /// Scratch directory for ledger staging on slow shared filesystems.
    #[arg(long)]
    tmpdb: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> BinConfig {
        let mut cfg = BinConfig::new(self.workdir, self.resolution);
        cfg.reads = self.bam;
        cfg.biases = self.biases;
        cfg.jobid = self.jobid;
        cfg.coord1 = self.coord;
        cfg.coord2 = self.coord2;
        if !self.norm.is_empty() {
            cfg.normalizations = self.norm;
        }
        if !self.filter.is_empty() {
            cfg.filters = self.filter;
        }
        cfg.cpus = self.cpus;
        cfg.nchunks = self.nchunks;
        cfg.matrix = self.matrix;
        cfg.plot = self.plot;
        cfg.only_plot = self.only_plot;
        cfg.cmap = self.cmap;
        cfg.format = self.format;
        cfg.compression = self.compression;
        cfg.only_valid = self.valid;
        cfg.force = self.force;
        cfg.quiet = self.quiet;
        cfg.tmpdb = self.tmpdb;
        cfg
    }
}

fn main() {
    let cli = Cli::parse();
    let default_level = if cli.quiet { "error" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match pipeline::run(&cli.into_config())? {
        Outcome::Completed { .. } | Outcome::Duplicate => Ok(()),
    }
}
