use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Result};
use itertools::Itertools;

use crate::fingerprint::{self, EXCLUDED_KEYS};
use crate::utils::Compression;

/// Normalization schemes applied to extracted matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Raw interaction counts.
    Raw,
    /// Bias-corrected values.
    Norm,
    /// Bias- and distance-decay-corrected values.
    Decay,
}

impl Normalization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Normalization::Raw => "raw",
            Normalization::Norm => "norm",
            Normalization::Decay => "decay",
        }
    }

    /// Tag used for ledger artifact types and legacy file naming.
    pub fn tag(&self) -> &'static str {
        match self {
            Normalization::Raw => "RAW",
            Normalization::Norm => "NRM",
            Normalization::Decay => "DEC",
        }
    }
}

impl FromStr for Normalization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Normalization::Raw),
            "norm" => Ok(Normalization::Norm),
            "decay" => Ok(Normalization::Decay),
            _ => Err(format!("unknown normalization: {} (choices: raw, norm, decay)", s)),
        }
    }
}

impl std::fmt::Display for Normalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated configuration of one binning run.
///
/// This is the explicit counterpart of the loose option bag the CLI parses:
/// every field is typed, defaulted, and checked once in [`BinConfig::validate`]
/// before any extraction work starts.
#[derive(Debug, Clone)]
pub struct BinConfig {
    /// Working directory holding the job ledger and outputs.
    pub workdir: PathBuf,
    /// Matrix resolution in base pairs.
    pub resolution: u64,
    /// Explicit reads input, bypassing provenance resolution.
    pub reads: Option<PathBuf>,
    /// Explicit bias file; required with `reads` when normalizing.
    pub biases: Option<PathBuf>,
    /// Explicit upstream job id disambiguating provenance resolution.
    pub jobid: Option<i64>,
    /// Primary coordinate expression.
    pub coord1: Option<String>,
    /// Secondary coordinate expression (intersection request).
    pub coord2: Option<String>,
    /// Normalizations to apply; order is significant. Default `[raw]`.
    pub normalizations: Vec<Normalization>,
    /// Read filter codes (1..=10). Default `[1, 2, 3, 4, 6, 7, 9, 10]`.
    pub filters: Vec<u8>,
    /// Worker pool size; 0 uses all available cores.
    pub cpus: usize,
    /// Number of scan chunks; 0 picks one chunk per worker.
    pub nchunks: usize,
    /// Force the matrix text output even when `only_plot` is set.
    pub matrix: bool,
    /// Render a heatmap figure per normalization.
    pub plot: bool,
    /// Skip the matrix text output.
    pub only_plot: bool,
    /// Color map recorded for the figure renderer. Default `gray`.
    pub cmap: String,
    /// Figure file format. Default `pgm`.
    pub format: String,
    /// Optional compression of the matrix text output.
    pub compression: Option<Compression>,
    /// Input contains only valid pairs; the filter mask is not applied.
    pub only_valid: bool,
    /// Bypass the duplicate-run short-circuit.
    pub force: bool,
    /// Errors only.
    pub quiet: bool,
    /// Scratch directory for ledger manipulation on slow shared filesystems.
    pub tmpdb: Option<PathBuf>,
}

impl BinConfig {
    pub fn new(workdir: PathBuf, resolution: u64) -> Self {
        Self {
            workdir,
            resolution,
            reads: None,
            biases: None,
            jobid: None,
            coord1: None,
            coord2: None,
            normalizations: vec![Normalization::Raw],
            filters: vec![1, 2, 3, 4, 6, 7, 9, 10],
            cpus: 0,
            nchunks: 0,
            matrix: false,
            plot: false,
            only_plot: false,
            cmap: "gray".to_string(),
            format: "pgm".to_string(),
            compression: None,
            only_valid: false,
            force: false,
            quiet: false,
            tmpdb: None,
        }
    }

    /// Check the configuration for contradictory or insufficient inputs.
    /// All failures here are fatal and reported before extraction begins.
    pub fn validate(&self) -> Result<()> {
        if !self.workdir.is_dir() {
            bail!("workdir not found: {}", self.workdir.display());
        }
        if self.resolution == 0 {
            bail!("resolution must be positive");
        }
        if self.normalizations.is_empty() {
            bail!("at least one normalization must be requested");
        }
        if let Some(f) = self.filters.iter().find(|f| **f == 0 || **f > 10) {
            bail!("filter codes must be within 1..=10, got {}", f);
        }
        if self.reads.is_some() && self.biases.is_none() && self.wants_normalized() {
            bail!("external reads input requires a bias file when normalizing");
        }
        if self.plot && self.format != "pgm" {
            bail!("unsupported figure format: {} (only pgm is built in)", self.format);
        }
        Ok(())
    }

    /// True when any non-raw normalization is requested.
    pub fn wants_normalized(&self) -> bool {
        self.normalizations.iter().any(|n| *n != Normalization::Raw)
    }

    /// Filter codes folded into the bitmask matched against record filter
    /// bits: code `k` sets bit `k - 1`.
    pub fn filter_mask(&self) -> u16 {
        if self.only_valid {
            return 0;
        }
        self.filters.iter().fold(0, |mask, f| mask | 1 << (f - 1))
    }

    /// The full named parameter set of this run, in declaration order.
    /// List options that are order-insensitive (filters) are sorted so that
    /// reordering them does not change the fingerprint.
    pub fn parameter_list(&self) -> Vec<(&'static str, String)> {
        fn opt<T: std::fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map(|x| x.to_string()).unwrap_or_default()
        }
        vec![
            ("workdir", self.workdir.display().to_string()),
            ("resolution", self.resolution.to_string()),
            ("bam", opt(&self.reads.as_deref().map(|p| p.display().to_string()))),
            ("biases", opt(&self.biases.as_deref().map(|p| p.display().to_string()))),
            ("jobid", opt(&self.jobid)),
            ("coord1", opt(&self.coord1)),
            ("coord2", opt(&self.coord2)),
            ("norm", self.normalizations.iter().map(|n| n.as_str()).join(",")),
            ("filter", self.filters.iter().sorted().join(",")),
            ("cpus", self.cpus.to_string()),
            ("nchunks", self.nchunks.to_string()),
            ("matrix", self.matrix.to_string()),
            ("plot", self.plot.to_string()),
            ("only_plot", self.only_plot.to_string()),
            ("cmap", self.cmap.clone()),
            ("format", self.format.clone()),
            (
                "compression",
                match self.compression {
                    Some(Compression::Gzip) => "gzip".to_string(),
                    None => String::new(),
                },
            ),
            ("valid", self.only_valid.to_string()),
            ("force", self.force.to_string()),
            ("quiet", self.quiet.to_string()),
            ("tmpdb", opt(&self.tmpdb.as_deref().map(|p| p.display().to_string()))),
        ]
    }

    /// Canonical parameter string persisted in the job ledger.
    pub fn canonical_parameters(&self) -> String {
        fingerprint::canonical_string(&self.parameter_list(), EXCLUDED_KEYS)
    }

    /// Deduplication digest of this run's parameters.
    pub fn fingerprint(&self) -> String {
        fingerprint::fingerprint(&self.parameter_list(), EXCLUDED_KEYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_mask() {
        let mut cfg = BinConfig::new(".".into(), 10_000);
        cfg.filters = vec![1, 2, 3, 4, 6, 7, 9, 10];
        assert_eq!(cfg.filter_mask(), 0b11_0110_1111);
        cfg.only_valid = true;
        assert_eq!(cfg.filter_mask(), 0);
    }

    #[test]
    fn test_fingerprint_ignores_irrelevant_options() {
        let mut a = BinConfig::new("/data/w".into(), 10_000);
        let mut b = a.clone();
        b.quiet = true;
        b.cpus = 8;
        b.nchunks = 100;
        assert_eq!(a.fingerprint(), b.fingerprint());
        a.resolution = 20_000;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_filter_order_is_irrelevant() {
        let mut a = BinConfig::new("/data/w".into(), 10_000);
        a.filters = vec![1, 2, 9];
        let mut b = a.clone();
        b.filters = vec![9, 1, 2];
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_normalization_order_matters() {
        let mut a = BinConfig::new("/data/w".into(), 10_000);
        a.normalizations = vec![Normalization::Raw, Normalization::Norm];
        let mut b = a.clone();
        b.normalizations = vec![Normalization::Norm, Normalization::Raw];
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_validate_external_reads_need_biases() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = BinConfig::new(dir.path().to_path_buf(), 10_000);
        cfg.reads = Some("reads.bam".into());
        cfg.normalizations = vec![Normalization::Norm];
        assert!(cfg.validate().is_err());
        cfg.biases = Some("biases.tsv".into());
        assert!(cfg.validate().is_ok());
        cfg.biases = None;
        cfg.normalizations = vec![Normalization::Raw];
        assert!(cfg.validate().is_ok());
    }
}
