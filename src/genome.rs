use anyhow::{bail, Result};
use bed_utils::bed::GenomicRange;
use indexmap::IndexMap;

use crate::region::Region;

/// Chromosome names and lengths, in reference order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChromSizes(IndexMap<String, u64>);

impl ChromSizes {
    pub fn get(&self, chrom: &str) -> Option<u64> {
        self.0.get(chrom).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for ChromSizes {
    fn from_iter<T: IntoIterator<Item = (S, u64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(s, l)| (s.into(), l)).collect())
    }
}

/// Half-open range of genome-wide bin indices covered by an extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinSpan {
    pub start: usize,
    pub end: usize,
}

impl BinSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, bin: usize) -> bool {
        bin >= self.start && bin < self.end
    }

    /// Translate a genome-wide bin index into the zero-based local range
    /// `[0, len)`. Indices outside the span have no local counterpart.
    pub fn to_local(&self, bin: usize) -> Option<usize> {
        self.contains(bin).then(|| bin - self.start)
    }

    /// Inverse of [`BinSpan::to_local`].
    pub fn to_global(&self, local: usize) -> Option<usize> {
        let bin = self.start + local;
        self.contains(bin).then_some(bin)
    }
}

/// Maps genomic positions to genome-wide bin indices at a fixed resolution.
///
/// Bins are numbered consecutively across chromosomes in reference order;
/// each chromosome contributes `ceil(length / resolution)` bins.
#[derive(Debug, Clone)]
pub struct GenomeBinIndex {
    // name, chromosome length, accumulated bin count at the chromosome's end
    chroms: Vec<(String, u64, usize)>,
    resolution: u64,
}

impl GenomeBinIndex {
    pub fn new(sizes: &ChromSizes, resolution: u64) -> Self {
        assert!(resolution > 0, "resolution must be positive");
        let mut acc = 0;
        let chroms = sizes
            .iter()
            .map(|(name, length)| {
                acc += length.div_ceil(resolution) as usize;
                (name.to_string(), length, acc)
            })
            .collect();
        Self { chroms, resolution }
    }

    pub fn resolution(&self) -> u64 {
        self.resolution
    }

    pub fn n_bins(&self) -> usize {
        self.chroms.last().map_or(0, |x| x.2)
    }

    pub fn chrom_sizes(&self) -> impl Iterator<Item = (&str, u64)> {
        self.chroms.iter().map(|(name, length, _)| (name.as_str(), *length))
    }

    fn position(&self, chrom: &str) -> Option<usize> {
        self.chroms.iter().position(|(name, _, _)| name == chrom)
    }

    /// First genome-wide bin of a chromosome.
    pub fn first_bin_of(&self, chrom: &str) -> Option<usize> {
        let i = self.position(chrom)?;
        Some(if i == 0 { 0 } else { self.chroms[i - 1].2 })
    }

    /// All bins of a chromosome.
    pub fn chrom_span(&self, chrom: &str) -> Option<BinSpan> {
        let i = self.position(chrom)?;
        let start = if i == 0 { 0 } else { self.chroms[i - 1].2 };
        Some(BinSpan { start, end: self.chroms[i].2 })
    }

    /// Genome-wide bin index of a position, `None` for unknown chromosomes
    /// or positions past the chromosome end.
    pub fn bin(&self, chrom: &str, pos: u64) -> Option<usize> {
        let i = self.position(chrom)?;
        let (_, length, _) = self.chroms[i];
        if pos >= length {
            return None;
        }
        let start = if i == 0 { 0 } else { self.chroms[i - 1].2 };
        Some(start + (pos / self.resolution) as usize)
    }

    /// Chromosome owning a genome-wide bin index.
    pub fn chrom_of(&self, bin: usize) -> Option<&str> {
        let i = self.chroms.partition_point(|x| x.2 <= bin);
        self.chroms.get(i).map(|(name, _, _)| name.as_str())
    }

    /// Genomic interval covered by a genome-wide bin, clipped to the
    /// chromosome end.
    pub fn region_of(&self, bin: usize) -> Option<GenomicRange> {
        let i = self.chroms.partition_point(|x| x.2 <= bin);
        let (name, length, _) = self.chroms.get(i)?;
        let first = if i == 0 { 0 } else { self.chroms[i - 1].2 };
        let start = (bin - first) as u64 * self.resolution;
        let end = (start + self.resolution).min(*length);
        Some(GenomicRange::new(name, start, end))
    }

    /// Bins covered by a region descriptor. Sub-span bounds are clipped to
    /// the chromosome end; the end bound is treated as exclusive.
    pub fn span_of(&self, region: &Region) -> Result<BinSpan> {
        match region {
            Region::WholeGenome => Ok(BinSpan { start: 0, end: self.n_bins() }),
            Region::Chrom(chrom) => self
                .chrom_span(chrom)
                .ok_or_else(|| anyhow::anyhow!("unknown chromosome: {}", chrom)),
            Region::Span { chrom, start, end } => {
                if start > end {
                    bail!("invalid region {}:{}-{}: start > end", chrom, start, end);
                }
                let full = self
                    .chrom_span(chrom)
                    .ok_or_else(|| anyhow::anyhow!("unknown chromosome: {}", chrom))?;
                let length = self.chrom_sizes().find(|(c, _)| c == chrom).unwrap().1;
                if *start >= length {
                    bail!("region {}:{}-{} lies past the chromosome end", chrom, start, end);
                }
                let end = (*end).min(length);
                let span = BinSpan {
                    start: full.start + (start / self.resolution) as usize,
                    end: full.start + (end.div_ceil(self.resolution)) as usize,
                };
                Ok(span)
            }
        }
    }

    /// Chromosomes overlapping a bin span, in reference order.
    pub fn chroms_in(&self, span: BinSpan) -> Vec<&str> {
        self.chroms
            .iter()
            .enumerate()
            .filter(|(i, (_, _, acc))| {
                let first = if *i == 0 { 0 } else { self.chroms[i - 1].2 };
                first < span.end && *acc > span.start
            })
            .map(|(_, (name, _, _))| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> GenomeBinIndex {
        let sizes: ChromSizes =
            [("chr1", 95u64), ("chr2", 30), ("chr3", 101)].into_iter().collect();
        GenomeBinIndex::new(&sizes, 10)
    }

    #[test]
    fn test_bin_layout() {
        let idx = index();
        // ceil(95/10) + ceil(30/10) + ceil(101/10)
        assert_eq!(idx.n_bins(), 10 + 3 + 11);
        assert_eq!(idx.first_bin_of("chr1"), Some(0));
        assert_eq!(idx.first_bin_of("chr2"), Some(10));
        assert_eq!(idx.first_bin_of("chr3"), Some(13));
        assert_eq!(idx.first_bin_of("chrM"), None);
    }

    #[test]
    fn test_bin_lookup() {
        let idx = index();
        [
            (("chr1", 0), Some(0)),
            (("chr1", 94), Some(9)),
            (("chr1", 95), None),
            (("chr2", 0), Some(10)),
            (("chr3", 100), Some(23)),
        ]
        .into_iter()
        .for_each(|((chrom, pos), expected)| assert_eq!(idx.bin(chrom, pos), expected));
    }

    #[test]
    fn test_region_of() {
        let idx = index();
        [
            (0, "chr1:0-10"),
            (9, "chr1:90-95"),
            (10, "chr2:0-10"),
            (23, "chr3:100-101"),
        ]
        .into_iter()
        .for_each(|(bin, expected)| {
            assert_eq!(idx.region_of(bin).unwrap().pretty_show(), expected)
        });
        assert_eq!(idx.region_of(24), None);
    }

    #[test]
    fn test_span_translation_round_trip() {
        let sizes: ChromSizes = [("chr1", 20_000u64)].into_iter().collect();
        let idx = GenomeBinIndex::new(&sizes, 10);
        let span = idx
            .span_of(&Region::Span { chrom: "chr1".into(), start: 10_000, end: 10_500 })
            .unwrap();
        assert_eq!(span, BinSpan { start: 1000, end: 1050 });
        assert_eq!(span.len(), 50);
        assert_eq!(span.to_local(1000), Some(0));
        assert_eq!(span.to_local(1049), Some(49));
        assert_eq!(span.to_global(0), Some(1000));
        assert_eq!(span.to_global(49), Some(1049));
        assert_eq!(span.to_local(999), None);
        assert_eq!(span.to_local(1050), None);
        assert_eq!(span.to_global(50), None);
    }

    #[test]
    fn test_span_of_region() {
        let idx = index();
        assert_eq!(
            idx.span_of(&Region::WholeGenome).unwrap(),
            BinSpan { start: 0, end: 24 }
        );
        assert_eq!(
            idx.span_of(&Region::Chrom("chr2".into())).unwrap(),
            BinSpan { start: 10, end: 13 }
        );
        // end clipped to the chromosome length
        assert_eq!(
            idx.span_of(&Region::Span { chrom: "chr2".into(), start: 5, end: 1000 })
                .unwrap(),
            BinSpan { start: 10, end: 13 }
        );
        assert!(idx
            .span_of(&Region::Span { chrom: "chr2".into(), start: 20, end: 10 })
            .is_err());
        assert!(idx.span_of(&Region::Chrom("chrM".into())).is_err());
    }

    #[test]
    fn test_chroms_in() {
        let idx = index();
        assert_eq!(idx.chroms_in(BinSpan { start: 0, end: 24 }), vec!["chr1", "chr2", "chr3"]);
        assert_eq!(idx.chroms_in(BinSpan { start: 10, end: 13 }), vec!["chr2"]);
        assert_eq!(idx.chroms_in(BinSpan { start: 9, end: 11 }), vec!["chr1", "chr2"]);
    }
}
