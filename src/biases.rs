//! Per-bin bias vectors, masked bins, and the distance-decay curve.
//!
//! Bias files are produced by the normalization stage of the pipeline. The
//! format is a plain (optionally gzipped) text file:
//!
//! ```text
//! # RESOLUTION 10000
//! # BADCOLS 5,17,42
//! # BIASES
//! 0<TAB>1.0213
//! 1<TAB>0.9871
//! # DECAY
//! 0<TAB>125.3
//! 1<TAB>88.1
//! ```
//!
//! Bias entries are keyed by genome-wide bin index, decay entries by
//! intra-chromosomal distance in bins. A bin with no bias entry is treated
//! as masked.

use std::collections::{BTreeSet, HashMap};
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::utils::open_file_for_read;

#[derive(Debug, Clone, Default)]
pub struct BiasTable {
    resolution: u64,
    biases: HashMap<usize, f64>,
    bad: BTreeSet<usize>,
    decay: HashMap<usize, f64>,
}

#[derive(PartialEq)]
enum Section {
    Biases,
    Decay,
}

impl BiasTable {
    pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(open_file_for_read(&path)?);
        Self::from_reader(reader)
            .with_context(|| format!("failed to parse bias file: {}", path.as_ref().display()))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut table = BiasTable::default();
        let mut section = Section::Biases;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix('#') {
                let rest = rest.trim();
                if let Some(reso) = rest.strip_prefix("RESOLUTION") {
                    table.resolution = reso
                        .trim()
                        .parse()
                        .with_context(|| format!("line {}: bad resolution", lineno + 1))?;
                } else if let Some(bad) = rest.strip_prefix("BADCOLS") {
                    for tok in bad.trim().split(',').filter(|t| !t.is_empty()) {
                        let bin = tok
                            .parse()
                            .with_context(|| format!("line {}: bad masked bin index", lineno + 1))?;
                        table.bad.insert(bin);
                    }
                } else if rest == "BIASES" {
                    section = Section::Biases;
                } else if rest == "DECAY" {
                    section = Section::Decay;
                } else {
                    bail!("line {}: unknown header: {}", lineno + 1, line);
                }
                continue;
            }
            let (key, value) = line
                .split_once('\t')
                .with_context(|| format!("line {}: expected two tab-separated fields", lineno + 1))?;
            let key: usize = key
                .trim()
                .parse()
                .with_context(|| format!("line {}: bad index", lineno + 1))?;
            let value: f64 = value
                .trim()
                .parse()
                .with_context(|| format!("line {}: bad value", lineno + 1))?;
            match section {
                Section::Biases => {
                    if value.is_finite() && value > 0.0 {
                        table.biases.insert(key, value);
                    } else {
                        table.bad.insert(key);
                    }
                }
                Section::Decay => {
                    table.decay.insert(key, value);
                }
            }
        }
        if table.resolution == 0 {
            bail!("bias file declares no resolution");
        }
        Ok(table)
    }

    pub fn resolution(&self) -> u64 {
        self.resolution
    }

    /// Correction factor of a genome-wide bin; `None` for masked bins.
    pub fn bias(&self, bin: usize) -> Option<f64> {
        if self.bad.contains(&bin) {
            None
        } else {
            self.biases.get(&bin).copied()
        }
    }

    pub fn is_bad(&self, bin: usize) -> bool {
        self.bias(bin).is_none()
    }

    /// Masked genome-wide bins, ascending. Bins without a bias entry are
    /// masked as well, so this is a superset of the declared `BADCOLS`.
    pub fn bad_bins(&self) -> impl Iterator<Item = usize> + '_ {
        self.bad.iter().copied()
    }

    /// Expected interaction value at an intra-chromosomal distance in bins.
    pub fn decay(&self, distance: usize) -> Option<f64> {
        self.decay.get(&distance).copied().filter(|d| d.is_finite() && *d > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "# RESOLUTION 10000\n\
                        # BADCOLS 2,5\n\
                        # BIASES\n\
                        0\t1.0\n\
                        1\t0.5\n\
                        3\t2.0\n\
                        4\tnan\n\
                        # DECAY\n\
                        0\t100.0\n\
                        1\t50.0\n";

    #[test]
    fn test_parse() {
        let table = BiasTable::from_reader(FILE.as_bytes()).unwrap();
        assert_eq!(table.resolution(), 10_000);
        assert_eq!(table.bias(0), Some(1.0));
        assert_eq!(table.bias(1), Some(0.5));
        // declared bad
        assert_eq!(table.bias(2), None);
        // non-finite bias
        assert!(table.is_bad(4));
        // absent entry
        assert!(table.is_bad(7));
        assert_eq!(table.decay(1), Some(50.0));
        assert_eq!(table.decay(9), None);
        assert_eq!(table.bad_bins().collect::<Vec<_>>(), vec![2, 4, 5]);
    }

    #[test]
    fn test_missing_resolution_is_an_error() {
        assert!(BiasTable::from_reader("0\t1.0\n".as_bytes()).is_err());
    }
}
