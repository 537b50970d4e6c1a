//! The binning stage: end-to-end orchestration of one run.
//!
//! A run resolves its inputs (explicit files or ledger provenance), assembles
//! one matrix per requested normalization, writes the text and figure outputs
//! under `05_sub-matrices/`, and finally registers itself and its artifacts
//! in the job ledger. Runs whose parameter digest is already in the ledger
//! are skipped unless forced.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Local;
use log::{info, warn};

use crate::biases::BiasTable;
use crate::config::{BinConfig, Normalization};
use crate::contacts::open_contact_source;
use crate::export;
use crate::figure::{FigureData, PgmRenderer, Renderer};
use crate::genome::GenomeBinIndex;
use crate::ledger::provenance::resolve_inputs;
use crate::ledger::{JobType, Ledger, LedgerSession, LEDGER_FILE};
use crate::matrix::assemble;
use crate::region::Region;
use crate::utils::Compression;

pub const OUTPUT_DIR: &str = "05_sub-matrices";
const TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed {
        jobid: i64,
        /// Produced files with their ledger type tags.
        outputs: Vec<(String, PathBuf)>,
    },
    /// An identical run is already registered in the ledger.
    Duplicate,
}

pub fn run(cfg: &BinConfig) -> Result<Outcome> {
    cfg.validate()?;
    let launch_time = Local::now().format(TIME_FORMAT).to_string();
    let digest = cfg.fingerprint();

    let ledger_path = cfg.workdir.join(LEDGER_FILE);
    if !cfg.force && ledger_path.exists() {
        let ledger = Ledger::open(&ledger_path)?;
        if ledger.has_job(JobType::Bin, &digest)? {
            warn!("an identical run is already registered; use --force to repeat it");
            return Ok(Outcome::Duplicate);
        }
    }

    let (reads, biases_path) = match &cfg.reads {
        Some(reads) => (reads.clone(), cfg.biases.clone()),
        None => {
            if !ledger_path.exists() {
                bail!("no reads file given and no job ledger in {}", cfg.workdir.display());
            }
            let ledger = Ledger::open(&ledger_path)?;
            let resolved = resolve_inputs(
                &ledger,
                &cfg.workdir,
                cfg.resolution,
                cfg.wants_normalized(),
                cfg.jobid,
            )?;
            (resolved.reads, cfg.biases.clone().or(resolved.biases))
        }
    };
    if cfg.wants_normalized() && biases_path.is_none() {
        bail!("normalized output requested but no bias file could be found");
    }

    let (region1, region2) = Region::resolve_pair(cfg.coord1.as_deref(), cfg.coord2.as_deref());
    match &region2 {
        Some(r2) => info!("extracting {} x {} at {} bp", region1.label(), r2.label(), cfg.resolution),
        None => info!("extracting {} at {} bp", region1.label(), cfg.resolution),
    }

    let outdir = cfg.workdir.join(OUTPUT_DIR);
    std::fs::create_dir_all(&outdir)
        .with_context(|| format!("cannot create output directory: {}", outdir.display()))?;

    let source = open_contact_source(&reads)?;
    let index = GenomeBinIndex::new(source.chrom_sizes(), cfg.resolution);
    let biases = match &biases_path {
        Some(path) => Some(BiasTable::read_from_path(path)?),
        None => None,
    };

    let region_label = match &region2 {
        Some(r2) => format!("{}_{}", region1.label(), r2.label()),
        None => region1.label(),
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.cpus)
        .build()
        .context("cannot build the worker pool")?;

    let mut outputs: Vec<(String, PathBuf)> = Vec::new();
    for norm in &cfg.normalizations {
        info!("assembling the {} matrix", norm);
        let matrix = pool.install(|| {
            assemble(
                source.as_ref(),
                &index,
                *norm,
                biases.as_ref(),
                &region1,
                region2.as_ref(),
                cfg.filter_mask(),
                cfg.nchunks,
            )
        })?;

        if cfg.matrix || !cfg.only_plot {
            let extension = match cfg.compression {
                Some(Compression::Gzip) => "mat.gz",
                None => "mat",
            };
            let name =
                export::output_file_name(*norm, &region_label, cfg.resolution, &digest, extension);
            let path = outdir.join(name);
            export::write_matrix_to_path(&path, &matrix, &index, cfg.compression)?;
            info!("wrote {}", path.display());
            outputs.push((format!("{}_MATRIX", norm.tag()), path));
        }
        if cfg.plot {
            let name = export::output_file_name(
                *norm,
                &region_label,
                cfg.resolution,
                &digest,
                &cfg.format,
            );
            let path = outdir.join(name);
            let figure = FigureData::from_matrix(&matrix);
            PgmRenderer.render(&figure, &path)?;
            info!("wrote {}", path.display());
            outputs.push((format!("{}_FIGURE", norm.tag()), path));
        }
    }

    let finish_time = Local::now().format(TIME_FORMAT).to_string();
    let session = LedgerSession::open(&cfg.workdir, cfg.tmpdb.as_deref())?;
    let (jobid, new) = session.ledger().insert_job_if_absent(
        JobType::Bin,
        &cfg.canonical_parameters(),
        &digest,
        &launch_time,
        &finish_time,
    )?;
    if !new {
        warn!("run was already registered as job {}", jobid);
    }
    for (tag, path) in &outputs {
        session.ledger().record_artifact(jobid, path, tag, &cfg.workdir)?;
    }
    session.close()?;
    info!("registered job {}", jobid);

    Ok(Outcome::Completed { jobid, outputs })
}
