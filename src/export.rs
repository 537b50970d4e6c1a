//! Sparse BED-like text output of assembled matrices.
//!
//! For each covered chromosome a `# CRM <name>\t<length>` header is written,
//! followed by exactly one masking header: `# BADROWS` / `# BADCOLS` when two
//! distinct regions were requested, a single `# MASKED` line otherwise. The
//! body holds one line per column bin (outer loop over columns, inner over
//! rows) of tab-separated cell values, `0` for cells absent from the sparse
//! mapping. Raw matrices are written with integer cells so that masked bins
//! keep their literal zero count.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use itertools::Itertools;

use crate::config::Normalization;
use crate::genome::GenomeBinIndex;
use crate::matrix::AssembledMatrix;
use crate::utils::{self, Compression};

/// `{norm}_{region}_{reso}_{fingerprint}.{ext}`, e.g.
/// `raw_chr3:1000-2000_10kb_d41d8cd9.mat`.
pub fn output_file_name(
    normalization: Normalization,
    region_label: &str,
    resolution: u64,
    fingerprint: &str,
    extension: &str,
) -> String {
    format!(
        "{}_{}_{}_{}.{}",
        normalization.as_str(),
        region_label,
        utils::nice_resolution(resolution),
        fingerprint,
        extension
    )
}

pub fn write_matrix<W: Write>(
    out: &mut W,
    matrix: &AssembledMatrix,
    index: &GenomeBinIndex,
) -> Result<()> {
    for chrom in &matrix.chroms {
        let length = index
            .chrom_sizes()
            .find(|(name, _)| name == chrom)
            .map(|(_, length)| length)
            .context("covered chromosome missing from the bin index")?;
        writeln!(out, "# CRM {}\t{}", chrom, length)?;
    }
    if matrix.two_regions {
        writeln!(out, "# BADROWS {}", matrix.local_bad_rows().iter().join(","))?;
        writeln!(out, "# BADCOLS {}", matrix.local_bad_cols().iter().join(","))?;
    } else {
        writeln!(out, "# MASKED {}", matrix.local_bad_rows().iter().join(","))?;
    }
    let raw = matrix.normalization == Normalization::Raw;
    for col in matrix.span2.start..matrix.span2.end {
        let line = (matrix.span1.start..matrix.span1.end)
            .map(|row| {
                let value = matrix.get(row, col);
                if raw {
                    format!("{}", value as u64)
                } else {
                    format!("{}", value)
                }
            })
            .join("\t");
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

pub fn write_matrix_to_path(
    path: &Path,
    matrix: &AssembledMatrix,
    index: &GenomeBinIndex,
    compression: Option<Compression>,
) -> Result<PathBuf> {
    let mut out = utils::open_file_for_write(path, compression)?;
    write_matrix(&mut out, matrix, index)
        .with_context(|| format!("failed to write matrix: {}", path.display()))?;
    Ok(path.to_path_buf())
}
