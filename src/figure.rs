//! Display preparation and rendering of assembled matrices.
//!
//! The transformations here are for visualization only and never feed back
//! into the persisted text output: zero cells are lifted to half of the
//! smallest nonzero value before a log2 transform, and masked cells are
//! marked by the cross product of the masked row and column sets (every
//! (bad_row, bad_col) pair, not a full row/column sweep).

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::Array2;

use crate::matrix::AssembledMatrix;

/// Dense, log2-transformed matrix ready for rendering. Rows follow the
/// primary-region axis, columns the secondary.
#[derive(Debug, Clone)]
pub struct FigureData {
    pub values: Array2<f64>,
    pub mask: Array2<bool>,
}

impl FigureData {
    pub fn from_matrix(matrix: &AssembledMatrix) -> FigureData {
        let (n_rows, n_cols) = (matrix.span1.len(), matrix.span2.len());
        let mut values = Array2::zeros((n_rows, n_cols));
        for ((i, j), v) in &matrix.values {
            if let (Some(r), Some(c)) = (matrix.span1.to_local(*i), matrix.span2.to_local(*j)) {
                values[[r, c]] = *v;
            }
        }
        let min_nonzero = values.iter().copied().filter(|v| *v > 0.0).reduce(f64::min);
        match min_nonzero {
            Some(min) => {
                values.mapv_inplace(|v| if v == 0.0 { min / 2.0 } else { v });
                values.mapv_inplace(f64::log2);
            }
            // an empty matrix renders flat; log2 would produce -inf everywhere
            None => {}
        }

        let mut mask = Array2::from_elem((n_rows, n_cols), false);
        for r in matrix.local_bad_rows() {
            for c in matrix.local_bad_cols() {
                mask[[r, c]] = true;
            }
        }
        FigureData { values, mask }
    }

    /// Masked cells as (row, col) pairs, row-major.
    pub fn masked_cells(&self) -> Vec<(usize, usize)> {
        self.mask
            .indexed_iter()
            .filter(|(_, masked)| **masked)
            .map(|((r, c), _)| (r, c))
            .collect()
    }
}

/// Collaborator seam for heatmap rendering.
pub trait Renderer {
    fn render(&self, figure: &FigureData, path: &Path) -> Result<()>;
}

/// Built-in grayscale renderer writing binary PGM. Finite values are scaled
/// to gray levels 0..=254; the maximum level 255 is reserved for masked
/// cells so they stay distinguishable from data.
pub struct PgmRenderer;

const MASKED_GRAY: u8 = 255;

impl Renderer for PgmRenderer {
    fn render(&self, figure: &FigureData, path: &Path) -> Result<()> {
        let (n_rows, n_cols) = figure.values.dim();
        if n_rows == 0 || n_cols == 0 {
            bail!("cannot render an empty matrix");
        }
        let finite: Vec<f64> = figure
            .values
            .indexed_iter()
            .filter(|(cell, v)| !figure.mask[*cell] && v.is_finite())
            .map(|(_, v)| *v)
            .collect();
        let lo = finite.iter().copied().reduce(f64::min).unwrap_or(0.0);
        let hi = finite.iter().copied().reduce(f64::max).unwrap_or(0.0);
        let scale = if hi > lo { 254.0 / (hi - lo) } else { 0.0 };

        let mut out = std::io::BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("cannot create figure file: {}", path.display()))?,
        );
        write!(out, "P5\n{} {}\n255\n", n_cols, n_rows)?;
        for r in 0..n_rows {
            let row: Vec<u8> = (0..n_cols)
                .map(|c| {
                    if figure.mask[[r, c]] {
                        MASKED_GRAY
                    } else {
                        let v = figure.values[[r, c]];
                        if v.is_finite() { ((v - lo) * scale) as u8 } else { 0 }
                    }
                })
                .collect();
            out.write_all(&row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    use crate::config::Normalization;
    use crate::genome::BinSpan;

    fn matrix(bad_rows: &[usize], bad_cols: &[usize]) -> AssembledMatrix {
        AssembledMatrix {
            normalization: Normalization::Norm,
            values: BTreeMap::from([((0, 0), 8.0), ((1, 2), 2.0)]),
            span1: BinSpan { start: 0, end: 6 },
            span2: BinSpan { start: 0, end: 6 },
            bad_rows: bad_rows.iter().copied().collect::<BTreeSet<_>>(),
            bad_cols: bad_cols.iter().copied().collect::<BTreeSet<_>>(),
            two_regions: true,
            chroms: vec!["chr1".to_string()],
        }
    }

    #[test]
    fn test_mask_is_the_cross_product() {
        let fig = FigureData::from_matrix(&matrix(&[2, 5], &[1, 3]));
        assert_eq!(fig.masked_cells(), vec![(2, 1), (2, 3), (5, 1), (5, 3)]);
    }

    #[test]
    fn test_zero_cells_get_half_the_minimum() {
        let fig = FigureData::from_matrix(&matrix(&[], &[]));
        // smallest nonzero value is 2.0, zeros become 1.0 -> log2 = 0
        assert_eq!(fig.values[[0, 1]], 0.0);
        assert_eq!(fig.values[[0, 0]], 3.0);
        assert_eq!(fig.values[[1, 2]], 1.0);
    }

    #[test]
    fn test_empty_matrix_stays_flat() {
        let mut mat = matrix(&[], &[]);
        mat.values.clear();
        let fig = FigureData::from_matrix(&mat);
        assert!(fig.values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_pgm_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fig.pgm");
        let fig = FigureData::from_matrix(&matrix(&[2, 5], &[1, 3]));
        PgmRenderer.render(&fig, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"P5\n6 6\n255\n"));
        let pixels = &bytes[b"P5\n6 6\n255\n".len()..];
        assert_eq!(pixels.len(), 36);
        // masked cells carry the reserved gray level
        assert_eq!(pixels[2 * 6 + 1], MASKED_GRAY);
        assert_eq!(pixels[5 * 6 + 3], MASKED_GRAY);
        // data cells never reach it
        assert!(pixels[0] < MASKED_GRAY);
    }
}
