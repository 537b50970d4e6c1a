/// A chromosome or chromosome sub-span selected for extraction.
///
/// Sub-span bounds are genomic positions with an exclusive end; they must be
/// well ordered but are otherwise validated against the genome only when the
/// region is turned into a bin span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
    WholeGenome,
    Chrom(String),
    Span { chrom: String, start: u64, end: u64 },
}

impl Region {
    /// Parse a coordinate expression.
    ///
    /// `chrom` selects a whole chromosome, `chrom:start-end` a sub-span. A
    /// malformed sub-span (wrong separator, non-numeric bounds) degrades to
    /// the whole chromosome named before the colon; this lenient fallback is
    /// long-standing pipeline behaviour, not an error path.
    pub fn parse(text: &str) -> Region {
        match text.split_once(':') {
            None => Region::Chrom(text.to_string()),
            Some((chrom, pos)) => {
                let bounds: Vec<_> = pos.split('-').collect();
                let parsed = if bounds.len() == 2 {
                    bounds[0].parse().ok().zip(bounds[1].parse().ok())
                } else {
                    None
                };
                match parsed {
                    Some((start, end)) => Region::Span { chrom: chrom.to_string(), start, end },
                    None => Region::Chrom(chrom.to_string()),
                }
            }
        }
    }

    /// Parse the primary and secondary coordinate expressions of a request.
    ///
    /// A secondary expression given without a primary is promoted to the
    /// primary slot; no expressions at all select the whole genome.
    pub fn resolve_pair(
        coord1: Option<&str>,
        coord2: Option<&str>,
    ) -> (Region, Option<Region>) {
        let (coord1, coord2) = match (coord1, coord2) {
            (None, Some(c2)) => (Some(c2), None),
            other => other,
        };
        match coord1 {
            None => (Region::WholeGenome, None),
            Some(c1) => (Region::parse(c1), coord2.map(Region::parse)),
        }
    }

    pub fn is_whole_genome(&self) -> bool {
        matches!(self, Region::WholeGenome)
    }

    /// Short name used in output file names and log messages.
    pub fn label(&self) -> String {
        match self {
            Region::WholeGenome => "full".to_string(),
            Region::Chrom(chrom) => chrom.clone(),
            Region::Span { chrom, start, end } => format!("{}:{}-{}", chrom, start, end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_chromosome() {
        assert_eq!(Region::parse("chr1"), Region::Chrom("chr1".into()));
    }

    #[test]
    fn test_parse_span() {
        assert_eq!(
            Region::parse("chr3:110000000-120000000"),
            Region::Span { chrom: "chr3".into(), start: 110000000, end: 120000000 }
        );
    }

    #[test]
    fn test_lenient_fallback() {
        // malformed spans degrade to the whole chromosome, never error
        assert_eq!(Region::parse("chr1:badformat"), Region::Chrom("chr1".into()));
        assert_eq!(Region::parse("chr1:100"), Region::Chrom("chr1".into()));
        assert_eq!(Region::parse("chr1:100-200-300"), Region::Chrom("chr1".into()));
        assert_eq!(Region::parse("chr1:100..200"), Region::Chrom("chr1".into()));
    }

    #[test]
    fn test_resolve_pair_promotion() {
        let (r1, r2) = Region::resolve_pair(None, Some("chr2"));
        assert_eq!(r1, Region::Chrom("chr2".into()));
        assert_eq!(r2, None);

        let (r1, r2) = Region::resolve_pair(None, None);
        assert_eq!(r1, Region::WholeGenome);
        assert_eq!(r2, None);

        let (r1, r2) = Region::resolve_pair(Some("chr1:1-10"), Some("chr2"));
        assert_eq!(r1, Region::Span { chrom: "chr1".into(), start: 1, end: 10 });
        assert_eq!(r2, Some(Region::Chrom("chr2".into())));
    }

    #[test]
    fn test_label() {
        assert_eq!(Region::WholeGenome.label(), "full");
        assert_eq!(Region::parse("chr2").label(), "chr2");
        assert_eq!(Region::parse("chr2:5-10").label(), "chr2:5-10");
    }
}
