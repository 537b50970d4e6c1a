//! Resolution of upstream inputs from the job ledger.
//!
//! When the reads file is not given on the command line, the binner walks
//! the ledger to find what the earlier pipeline stages produced: bias files
//! from a normalization job when normalized output is requested, otherwise
//! the filtered valid-pairs file, with job id 1 as the bootstrap fallback of
//! workdirs predating per-stage bookkeeping.

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{info, warn};
use thiserror::Error;

use super::{JobType, Ledger};

#[derive(Debug, Error)]
pub enum ProvenanceError {
    #[error("more than one possible input job found; rerun with an explicit --jobid")]
    AmbiguousInput,
    #[error("no upstream job produced a usable reads file")]
    NoCandidate,
}

/// Inputs recovered from the ledger. `biases` is populated only when a
/// normalization job at the right resolution was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInputs {
    pub jobid: i64,
    pub reads: PathBuf,
    pub biases: Option<PathBuf>,
}

pub fn resolve_inputs(
    ledger: &Ledger,
    workdir: &Path,
    resolution: u64,
    wants_normalized: bool,
    explicit_jobid: Option<i64>,
) -> Result<ResolvedInputs> {
    let jobid = match explicit_jobid {
        Some(id) => id,
        None => pick_job(ledger, resolution, wants_normalized)?,
    };
    info!("resolving inputs from job {}", jobid);

    if wants_normalized {
        if let Some(resolved) = normalize_inputs(ledger, workdir, jobid, resolution)? {
            return Ok(resolved);
        }
        warn!("normalization inputs not found for job {}; falling back to the filtered valid pairs", jobid);
    }
    let reads = valid_pairs_of(ledger, workdir, jobid)?;
    Ok(ResolvedInputs { jobid, reads, biases: None })
}

/// Pick the upstream job: normalize jobs first when normalizing, then filter
/// jobs, then the hard-coded bootstrap id 1. Several candidates are narrowed
/// down to the one that normalized at the requested resolution.
fn pick_job(ledger: &Ledger, resolution: u64, wants_normalized: bool) -> Result<i64> {
    let mut candidates = Vec::new();
    if wants_normalized {
        candidates = ledger.job_ids_of_type(JobType::Normalize)?;
    }
    if candidates.is_empty() {
        candidates = ledger.job_ids_of_type(JobType::Filter)?;
    }
    if candidates.is_empty() {
        candidates = vec![1];
    }
    if candidates.len() > 1 {
        let at_resolution = ledger.normalize_jobs_at_resolution(resolution)?;
        candidates.retain(|id| at_resolution.contains(id));
        if candidates.len() != 1 {
            return Err(ProvenanceError::AmbiguousInput.into());
        }
    }
    Ok(candidates[0])
}

fn normalize_inputs(
    ledger: &Ledger,
    workdir: &Path,
    jobid: i64,
    resolution: u64,
) -> Result<Option<ResolvedInputs>> {
    let (Some(biases), Some(reads)) =
        (ledger.path_of_type(jobid, "BIASES")?, ledger.normalize_input_path(jobid)?)
    else {
        return Ok(None);
    };
    if let Some(stored) = ledger.normalize_resolution(jobid)? {
        if stored != resolution {
            warn!(
                "job {} normalized at resolution {}, not the requested {}",
                jobid, stored, resolution
            );
        }
    }
    Ok(Some(ResolvedInputs {
        jobid,
        reads: absolutize(workdir, reads),
        biases: Some(absolutize(workdir, biases)),
    }))
}

fn valid_pairs_of(ledger: &Ledger, workdir: &Path, jobid: i64) -> Result<PathBuf> {
    let mut outputs = ledger.filter_output_paths(jobid, "valid-pairs")?;
    match outputs.len() {
        0 => Err(ProvenanceError::NoCandidate.into()),
        1 => Ok(absolutize(workdir, outputs.remove(0))),
        _ => Err(ProvenanceError::AmbiguousInput.into()),
    }
}

fn absolutize(workdir: &Path, (path, relative): (PathBuf, bool)) -> PathBuf {
    if relative {
        workdir.join(path)
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LEDGER_FILE;

    fn ledger(dir: &Path) -> Ledger {
        Ledger::open(&dir.join(LEDGER_FILE)).unwrap()
    }

    fn seed_filter(ledger: &Ledger, digest: &str, pairs: &str, workdir: &Path) -> i64 {
        let (jobid, _) =
            ledger.insert_job_if_absent(JobType::Filter, "f", digest, "t0", "t1").unwrap();
        let path_id =
            ledger.record_artifact(jobid, &workdir.join(pairs), "2D_BED", workdir).unwrap();
        ledger.record_filter_output(jobid, path_id, "valid-pairs").unwrap();
        jobid
    }

    fn seed_normalize(
        ledger: &Ledger,
        digest: &str,
        filter_jobid: i64,
        resolution: u64,
        workdir: &Path,
    ) -> i64 {
        let (jobid, _) =
            ledger.insert_job_if_absent(JobType::Normalize, "n", digest, "t2", "t3").unwrap();
        let input_id = {
            let pairs = ledger.filter_output_paths(filter_jobid, "valid-pairs").unwrap();
            // re-register the input under the normalize job to get its row id
            ledger.record_artifact(jobid, &workdir.join(&pairs[0].0), "2D_BED", workdir).unwrap()
        };
        ledger.record_normalize_output(jobid, input_id, resolution).unwrap();
        ledger
            .record_artifact(jobid, &workdir.join("04_normalization/biases.tsv"), "BIASES", workdir)
            .unwrap();
        jobid
    }

    #[test]
    fn test_raw_run_takes_the_filter_output() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        seed_filter(&ledger, "hf", "03_filtered/valid.tsv", dir.path());
        let resolved = resolve_inputs(&ledger, dir.path(), 10_000, false, None).unwrap();
        assert_eq!(resolved.reads, dir.path().join("03_filtered/valid.tsv"));
        assert_eq!(resolved.biases, None);
    }

    #[test]
    fn test_normalized_run_takes_biases_and_normalize_input() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        let filter = seed_filter(&ledger, "hf", "03_filtered/valid.tsv", dir.path());
        seed_normalize(&ledger, "hn", filter, 10_000, dir.path());
        let resolved = resolve_inputs(&ledger, dir.path(), 10_000, true, None).unwrap();
        assert_eq!(resolved.reads, dir.path().join("03_filtered/valid.tsv"));
        assert_eq!(resolved.biases, Some(dir.path().join("04_normalization/biases.tsv")));
    }

    #[test]
    fn test_resolution_narrows_several_normalize_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        let filter = seed_filter(&ledger, "hf", "03_filtered/valid.tsv", dir.path());
        seed_normalize(&ledger, "hn10", filter, 10_000, dir.path());
        let wanted = seed_normalize(&ledger, "hn20", filter, 20_000, dir.path());
        let resolved = resolve_inputs(&ledger, dir.path(), 20_000, true, None).unwrap();
        assert_eq!(resolved.jobid, wanted);
    }

    #[test]
    fn test_ambiguity_requires_an_explicit_jobid() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        let filter = seed_filter(&ledger, "hf", "03_filtered/valid.tsv", dir.path());
        seed_normalize(&ledger, "hna", filter, 10_000, dir.path());
        let second = seed_normalize(&ledger, "hnb", filter, 10_000, dir.path());
        let err = resolve_inputs(&ledger, dir.path(), 10_000, true, None).unwrap_err();
        assert!(err.downcast_ref::<ProvenanceError>().is_some());
        // the explicit jobid settles it
        let resolved = resolve_inputs(&ledger, dir.path(), 10_000, true, Some(second)).unwrap();
        assert_eq!(resolved.jobid, second);
    }

    #[test]
    fn test_missing_normalization_falls_back_to_valid_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        seed_filter(&ledger, "hf", "03_filtered/valid.tsv", dir.path());
        // normalization requested but never run: reads resolve, biases stay empty
        let resolved = resolve_inputs(&ledger, dir.path(), 10_000, true, None).unwrap();
        assert_eq!(resolved.reads, dir.path().join("03_filtered/valid.tsv"));
        assert_eq!(resolved.biases, None);
    }

    #[test]
    fn test_empty_ledger_has_no_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        let err = resolve_inputs(&ledger, dir.path(), 10_000, false, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvenanceError>(),
            Some(ProvenanceError::NoCandidate)
        ));
    }
}
