//! Sources of Hi-C read pairs.
//!
//! The matrix assembler only depends on the [`ContactSource`] seam: a source
//! exposes reference names and lengths and a chunked-scan primitive yielding
//! per-chunk sparse count contributions. Two sources are built in, a BAM
//! reader for pipeline-internal reads where the flag word carries the filter
//! bits, and a 4DN-style `.pairs` text reader for pre-filtered input.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use noodles::bam;

use crate::genome::{BinSpan, ChromSizes, GenomeBinIndex};

/// Sparse count contribution of one scan chunk, keyed by
/// (genome-wide row bin, genome-wide column bin).
pub type ChunkCounts = BTreeMap<(usize, usize), u64>;

/// Everything a chunk scan needs to map read pairs onto matrix cells.
pub struct ScanSettings<'a> {
    pub index: &'a GenomeBinIndex,
    /// Bins of the row axis (primary region).
    pub span1: BinSpan,
    /// Bins of the column axis (secondary region, or the primary again).
    pub span2: BinSpan,
    /// Records with any of these filter bits set are excluded; 0 keeps all.
    pub filter_mask: u16,
}

impl ScanSettings<'_> {
    /// Record one pair of binned read ends. Each pair contributes
    /// symmetrically: to (b1, b2) and, when the mirrored cell is distinct and
    /// also covered, to (b2, b1). Cells outside the spans are dropped.
    pub fn record(&self, counts: &mut ChunkCounts, b1: usize, b2: usize) {
        if self.span1.contains(b1) && self.span2.contains(b2) {
            *counts.entry((b1, b2)).or_insert(0) += 1;
        }
        if b1 != b2 && self.span1.contains(b2) && self.span2.contains(b1) {
            *counts.entry((b2, b1)).or_insert(0) += 1;
        }
    }
}

pub trait ContactSource: Sync {
    /// Reference names and lengths, in the order of the source header.
    fn chrom_sizes(&self) -> &ChromSizes;

    /// Scan the chunk `chunk` of `nchunks` and return its sparse count
    /// contribution. Chunks partition the read pairs, so summing the maps of
    /// all chunks yields the full matrix; the partition is deterministic and
    /// independent of processing order.
    fn count_chunk(&self, chunk: usize, nchunks: usize, scan: &ScanSettings) -> Result<ChunkCounts>;
}

/// Open a contact source by file extension: `.bam` input is read with
/// noodles, anything else is treated as a `.pairs` text file.
pub fn open_contact_source(path: &Path) -> Result<Box<dyn ContactSource>> {
    if path.extension().is_some_and(|e| e == "bam") {
        Ok(Box::new(BamContacts::open(path)?))
    } else {
        Ok(Box::new(PairsFile::open(path)?))
    }
}

/// Read pairs stored as a coordinate-less BAM where each record carries both
/// ends (mate fields) and the pipeline's filter bits in the flag word.
pub struct BamContacts {
    path: PathBuf,
    names: Vec<String>,
    chrom_sizes: ChromSizes,
}

impl BamContacts {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = bam::io::reader::Builder::default()
            .build_from_path(&path)
            .with_context(|| format!("cannot open BAM file: {}", path.display()))?;
        let header = reader.read_header()?;
        let names: Vec<String> = header
            .reference_sequences()
            .keys()
            .map(|name| name.to_string())
            .collect();
        let chrom_sizes: ChromSizes = header
            .reference_sequences()
            .iter()
            .map(|(name, map)| (name.to_string(), usize::from(map.length()) as u64))
            .collect();
        if chrom_sizes.is_empty() {
            bail!("BAM file has no reference sequences: {}", path.display());
        }
        Ok(Self { path, names, chrom_sizes })
    }
}

impl ContactSource for BamContacts {
    fn chrom_sizes(&self) -> &ChromSizes {
        &self.chrom_sizes
    }

    fn count_chunk(&self, chunk: usize, nchunks: usize, scan: &ScanSettings) -> Result<ChunkCounts> {
        let mut reader = bam::io::reader::Builder::default().build_from_path(&self.path)?;
        reader.read_header()?;
        let mut counts = ChunkCounts::new();
        for (ordinal, record) in reader.records().enumerate() {
            let record = record?;
            if ordinal % nchunks != chunk {
                continue;
            }
            if scan.filter_mask != 0 && record.flags().bits() & scan.filter_mask != 0 {
                continue;
            }
            let (Some(rid1), Some(start1), Some(rid2), Some(start2)) = (
                record.reference_sequence_id().transpose()?,
                record.alignment_start().transpose()?,
                record.mate_reference_sequence_id().transpose()?,
                record.mate_alignment_start().transpose()?,
            ) else {
                continue;
            };
            let pos1 = usize::from(start1) as u64 - 1;
            let pos2 = usize::from(start2) as u64 - 1;
            let (Some(b1), Some(b2)) = (
                self.names.get(rid1).and_then(|c| scan.index.bin(c, pos1)),
                self.names.get(rid2).and_then(|c| scan.index.bin(c, pos2)),
            ) else {
                continue;
            };
            scan.record(&mut counts, b1, b2);
        }
        Ok(counts)
    }
}

/// 4DN-style pairs text file: `#chromsize:` header lines followed by
/// whitespace-separated records `readID chrom1 pos1 chrom2 pos2 ...` with
/// 1-based positions. Pairs files contain only valid pairs, so the filter
/// mask does not apply. Gzip-transparent.
pub struct PairsFile {
    path: PathBuf,
    chrom_sizes: ChromSizes,
}

impl PairsFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = BufReader::new(crate::utils::open_file_for_read(&path)?);
        let mut chrom_sizes = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.starts_with('#') {
                break;
            }
            if let Some(rest) = line.strip_prefix("#chromsize:") {
                let mut fields = rest.split_whitespace();
                let (Some(name), Some(length)) = (fields.next(), fields.next()) else {
                    bail!("malformed #chromsize header: {}", line);
                };
                chrom_sizes.push((name.to_string(), length.parse::<u64>()?));
            }
        }
        if chrom_sizes.is_empty() {
            bail!("pairs file has no #chromsize headers: {}", path.display());
        }
        Ok(Self { path, chrom_sizes: chrom_sizes.into_iter().collect() })
    }
}

impl ContactSource for PairsFile {
    fn chrom_sizes(&self) -> &ChromSizes {
        &self.chrom_sizes
    }

    fn count_chunk(&self, chunk: usize, nchunks: usize, scan: &ScanSettings) -> Result<ChunkCounts> {
        let reader = BufReader::new(crate::utils::open_file_for_read(&self.path)?);
        let mut counts = ChunkCounts::new();
        let records = reader
            .lines()
            .filter(|l| !matches!(l, Ok(l) if l.starts_with('#') || l.trim().is_empty()));
        for (ordinal, line) in records.enumerate() {
            let line = line?;
            if ordinal % nchunks != chunk {
                continue;
            }
            let fields: Vec<_> = line.split_whitespace().collect();
            if fields.len() < 5 {
                bail!("malformed pairs record: {}", line);
            }
            let pos1: u64 = fields[2].parse().with_context(|| format!("bad position: {}", line))?;
            let pos2: u64 = fields[4].parse().with_context(|| format!("bad position: {}", line))?;
            let (Some(b1), Some(b2)) = (
                scan.index.bin(fields[1], pos1.saturating_sub(1)),
                scan.index.bin(fields[3], pos2.saturating_sub(1)),
            ) else {
                continue;
            };
            scan.record(&mut counts, b1, b2);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PAIRS: &str = "## pairs format v1.0\n\
                         #chromsize: chr1 95\n\
                         #chromsize: chr2 30\n\
                         r1\tchr1\t1\tchr1\t12\t+\t-\n\
                         r2\tchr1\t3\tchr1\t18\t+\t-\n\
                         r3\tchr1\t96\tchr2\t5\t+\t+\n\
                         r4\tchr2\t2\tchr2\t2\t+\t-\n";

    fn write_pairs(dir: &Path) -> PathBuf {
        let path = dir.join("test.pairs");
        std::fs::File::create(&path).unwrap().write_all(PAIRS.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_pairs_header() {
        let dir = tempfile::tempdir().unwrap();
        let source = PairsFile::open(write_pairs(dir.path())).unwrap();
        assert_eq!(
            source.chrom_sizes().iter().collect::<Vec<_>>(),
            vec![("chr1", 95), ("chr2", 30)]
        );
    }

    #[test]
    fn test_pairs_scan_whole_genome() {
        let dir = tempfile::tempdir().unwrap();
        let source = PairsFile::open(write_pairs(dir.path())).unwrap();
        let index = GenomeBinIndex::new(source.chrom_sizes(), 10);
        let whole = BinSpan { start: 0, end: index.n_bins() };
        let scan = ScanSettings { index: &index, span1: whole, span2: whole, filter_mask: 0 };
        // merging all chunks is independent of the chunk count
        for nchunks in [1, 3] {
            let mut counts = ChunkCounts::new();
            for c in 0..nchunks {
                for (k, v) in source.count_chunk(c, nchunks, &scan).unwrap() {
                    *counts.entry(k).or_insert(0) += v;
                }
            }
            // r3 maps past the end of chr1 (pos 96 of 95) and is dropped
            let expected: ChunkCounts = [((0, 1), 2u64), ((1, 0), 2), ((10, 10), 1)]
                .into_iter()
                .collect();
            assert_eq!(counts, expected);
        }
    }

    #[test]
    fn test_pairs_scan_region() {
        let dir = tempfile::tempdir().unwrap();
        let source = PairsFile::open(write_pairs(dir.path())).unwrap();
        let index = GenomeBinIndex::new(source.chrom_sizes(), 10);
        // chr2 only
        let span = index.chrom_span("chr2").unwrap();
        let scan = ScanSettings { index: &index, span1: span, span2: span, filter_mask: 0 };
        let counts = source.count_chunk(0, 1, &scan).unwrap();
        assert_eq!(counts, [((10, 10), 1u64)].into_iter().collect());
    }
}
