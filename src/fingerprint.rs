//! Canonical fingerprinting of run parameters.
//!
//! The fingerprint is the deduplication key of the job ledger: two runs whose
//! parameters are semantically identical must digest identically, regardless
//! of the order options were given in and regardless of parameters that do
//! not affect the produced output (verbosity, worker counts, scratch paths).

use itertools::Itertools;

/// Parameter keys that never contribute to output identity.
pub const EXCLUDED_KEYS: &[&str] = &["quiet", "cpus", "nchunks", "tmpdb", "force"];

/// Canonical, human-readable form of a parameter set.
///
/// Keys are sorted, excluded keys dropped, and each entry rendered as
/// `key=value`. The result is stored verbatim in the job ledger so a recorded
/// run can be reconstructed from its row alone.
pub fn canonical_string(params: &[(&str, String)], excluded: &[&str]) -> String {
    params
        .iter()
        .filter(|(key, _)| !excluded.contains(key))
        .sorted_by_key(|(key, _)| *key)
        .map(|(key, value)| format!("{}={}", key, value))
        .join("; ")
}

/// Hex digest over [`canonical_string`], used as the deduplication key and as
/// a traceable suffix in output file names.
pub fn fingerprint(params: &[(&str, String)], excluded: &[&str]) -> String {
    format!("{:x}", md5::compute(canonical_string(params, excluded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Vec<(&'static str, String)> {
        vec![
            ("resolution", "10000".to_string()),
            ("workdir", "/data/run1".to_string()),
            ("norm", "raw,norm".to_string()),
            ("quiet", "true".to_string()),
        ]
    }

    #[test]
    fn test_reordering_is_stable() {
        let mut reordered = params();
        reordered.reverse();
        assert_eq!(
            fingerprint(&params(), EXCLUDED_KEYS),
            fingerprint(&reordered, EXCLUDED_KEYS)
        );
    }

    #[test]
    fn test_excluded_keys_are_ignored() {
        let mut other = params();
        other.retain(|(k, _)| *k != "quiet");
        assert_eq!(
            fingerprint(&params(), EXCLUDED_KEYS),
            fingerprint(&other, EXCLUDED_KEYS)
        );
    }

    #[test]
    fn test_value_change_changes_digest() {
        let mut other = params();
        other[0].1 = "20000".to_string();
        assert_ne!(
            fingerprint(&params(), EXCLUDED_KEYS),
            fingerprint(&other, EXCLUDED_KEYS)
        );
    }

    #[test]
    fn test_canonical_string_form() {
        assert_eq!(
            canonical_string(&params(), EXCLUDED_KEYS),
            "norm=raw,norm; resolution=10000; workdir=/data/run1"
        );
    }
}
