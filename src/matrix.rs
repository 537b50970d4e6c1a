//! Region-aware assembly of genomic bin matrices.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};
use indicatif::ParallelProgressIterator;
use log::warn;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::biases::BiasTable;
use crate::config::Normalization;
use crate::contacts::{ChunkCounts, ContactSource, ScanSettings};
use crate::genome::{BinSpan, GenomeBinIndex};
use crate::region::Region;

/// One extracted matrix together with everything needed to write or render
/// it: the covered bin spans (genome-wide indices, rows = primary region,
/// columns = secondary), the masked bins per axis, and the chromosomes the
/// spans touch in reference order.
#[derive(Debug, Clone)]
pub struct AssembledMatrix {
    pub normalization: Normalization,
    /// Sparse values keyed by (genome-wide row bin, genome-wide column bin).
    /// Raw counts for [`Normalization::Raw`], corrected values otherwise.
    pub values: BTreeMap<(usize, usize), f64>,
    pub span1: BinSpan,
    pub span2: BinSpan,
    /// Masked genome-wide bins on the row axis.
    pub bad_rows: BTreeSet<usize>,
    /// Masked genome-wide bins on the column axis. Identical to `bad_rows`
    /// unless two distinct regions were requested.
    pub bad_cols: BTreeSet<usize>,
    /// Whether rows and columns were masked independently.
    pub two_regions: bool,
    /// Chromosomes covered by the spans, in reference order.
    pub chroms: Vec<String>,
}

impl AssembledMatrix {
    /// Value at a pair of genome-wide bin indices, 0 when absent.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values.get(&(row, col)).copied().unwrap_or(0.0)
    }

    /// Masked row bins translated to local indices, ascending.
    pub fn local_bad_rows(&self) -> Vec<usize> {
        self.bad_rows.iter().filter_map(|b| self.span1.to_local(*b)).collect()
    }

    /// Masked column bins translated to local indices, ascending.
    pub fn local_bad_cols(&self) -> Vec<usize> {
        self.bad_cols.iter().filter_map(|b| self.span2.to_local(*b)).collect()
    }
}

/// Extract one matrix for one normalization mode.
///
/// The scan is partitioned into `nchunks` independent chunks counted on the
/// current rayon pool; chunk merge is a commutative sum, so worker scheduling
/// never affects the result. `biases` must be given for any non-raw mode and
/// is ignored for raw extraction.
pub fn assemble(
    source: &dyn ContactSource,
    index: &GenomeBinIndex,
    normalization: Normalization,
    biases: Option<&BiasTable>,
    region1: &Region,
    region2: Option<&Region>,
    filter_mask: u16,
    nchunks: usize,
) -> Result<AssembledMatrix> {
    let span1 = index.span_of(region1)?;
    let span2 = match region2 {
        Some(r) => index.span_of(r)?,
        None => span1,
    };
    let two_regions = region2.is_some();
    let biases = match (normalization, biases) {
        (Normalization::Raw, _) => None,
        (_, Some(b)) => {
            if b.resolution() != index.resolution() {
                warn!(
                    "bias resolution {} does not match the requested resolution {}",
                    b.resolution(),
                    index.resolution()
                );
            }
            Some(b)
        }
        (_, None) => bail!("{} normalization requested without a bias source", normalization),
    };

    let nchunks = if nchunks == 0 { rayon::current_num_threads() } else { nchunks };
    let scan = ScanSettings { index, span1, span2, filter_mask };
    let counts: ChunkCounts = (0..nchunks)
        .into_par_iter()
        .progress_count(nchunks as u64)
        .map(|chunk| source.count_chunk(chunk, nchunks, &scan))
        .try_reduce(ChunkCounts::new, |mut acc, chunk| {
            for (cell, n) in chunk {
                *acc.entry(cell).or_insert(0) += n;
            }
            Ok(acc)
        })?;

    let (bad_rows, bad_cols) = match biases {
        None => (BTreeSet::new(), BTreeSet::new()),
        Some(b) => {
            let rows: BTreeSet<usize> = b.bad_bins().filter(|bin| span1.contains(*bin)).collect();
            let cols = if two_regions {
                b.bad_bins().filter(|bin| span2.contains(*bin)).collect()
            } else {
                rows.clone()
            };
            (rows, cols)
        }
    };

    let mut missing_decay = 0u64;
    let values = match normalization {
        Normalization::Raw => counts.into_iter().map(|(cell, n)| (cell, n as f64)).collect(),
        Normalization::Norm | Normalization::Decay => {
            let biases = biases.unwrap();
            counts
                .into_iter()
                .filter_map(|((i, j), n)| {
                    // masked bins never contribute a finite normalized value
                    let (bi, bj) = (biases.bias(i)?, biases.bias(j)?);
                    let mut value = n as f64 / (bi * bj);
                    if normalization == Normalization::Decay
                        && index.chrom_of(i) == index.chrom_of(j)
                    {
                        match biases.decay(i.abs_diff(j)) {
                            Some(expected) => value /= expected,
                            None => {
                                missing_decay += 1;
                                return None;
                            }
                        }
                    }
                    Some(((i, j), value))
                })
                .collect()
        }
    };
    if missing_decay > 0 {
        warn!("{} cells dropped: no decay estimate at their distance", missing_decay);
    }

    let mut chroms: Vec<String> =
        index.chroms_in(span1).into_iter().map(|c| c.to_string()).collect();
    if two_regions {
        for chrom in index.chroms_in(span2) {
            if !chroms.iter().any(|c| c == chrom) {
                chroms.push(chrom.to_string());
            }
        }
    }

    Ok(AssembledMatrix {
        normalization,
        values,
        span1,
        span2,
        bad_rows,
        bad_cols,
        two_regions,
        chroms,
    })
}
