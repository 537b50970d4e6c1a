//! The per-workdir job ledger.
//!
//! Every pipeline stage records itself in `trace.db`, a SQLite database at
//! the root of the working directory: one `Jobs` row per run (deduplicated by
//! a parameter digest), one `Paths` row per produced file, and per-stage
//! output tables linking artifacts back to their jobs. Concurrent runs are
//! serialized with a sentinel lock file next to the database; runs on slow
//! shared filesystems can stage all database writes through a scratch copy.

pub mod provenance;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use rusqlite::{Connection, OptionalExtension};

pub const LEDGER_FILE: &str = "trace.db";
const LOCK_FILE: &str = "__lock_db";
const LOCK_POLL: Duration = Duration::from_millis(500);

/// Kinds of jobs the ledger distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    Filter,
    Normalize,
    Bin,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Filter => "Filter",
            JobType::Normalize => "Normalize",
            JobType::Bin => "Bin",
        }
    }
}

/// Sentinel-file lock guarding the ledger. Creation is atomic
/// (`create_new`); a holder that crashed leaves the sentinel behind, which
/// has to be removed by hand.
pub struct LedgerLock {
    path: PathBuf,
}

impl LedgerLock {
    pub fn acquire(workdir: &Path) -> Result<Self> {
        let path = workdir.join(LOCK_FILE);
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("ledger is locked, waiting: {}", path.display());
                    thread::sleep(LOCK_POLL);
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("cannot create lock file: {}", path.display()))
                }
            }
        }
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("failed to release ledger lock {}: {}", self.path.display(), e);
        }
    }
}

/// An open ledger database.
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Open (creating tables as needed) the ledger at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("cannot open job ledger: {}", path.display()))?;
        let ledger = Self { conn };
        ledger.ensure_schema()?;
        Ok(ledger)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS Jobs (
                 Id INTEGER PRIMARY KEY AUTOINCREMENT,
                 Parameters TEXT,
                 Launch_time TEXT,
                 Finish_time TEXT,
                 Type TEXT,
                 Parameters_md5 TEXT,
                 UNIQUE (Type, Parameters_md5));
             CREATE TABLE IF NOT EXISTS Paths (
                 Id INTEGER PRIMARY KEY AUTOINCREMENT,
                 Path TEXT,
                 Type TEXT,
                 JOBid INTEGER,
                 Workdir_relative INTEGER);
             CREATE TABLE IF NOT EXISTS Filter_Outputs (
                 Id INTEGER PRIMARY KEY AUTOINCREMENT,
                 PathId INTEGER,
                 Name TEXT,
                 JOBid INTEGER);
             CREATE TABLE IF NOT EXISTS Normalize_Outputs (
                 Id INTEGER PRIMARY KEY AUTOINCREMENT,
                 JOBid INTEGER,
                 Input INTEGER,
                 Resolution INTEGER);",
        )?;
        Ok(())
    }

    /// Register a job unless a job of the same type and digest exists.
    /// Returns the job id and whether a new row was inserted.
    pub fn insert_job_if_absent(
        &self,
        jtype: JobType,
        parameters: &str,
        fingerprint: &str,
        launch_time: &str,
        finish_time: &str,
    ) -> Result<(i64, bool)> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO Jobs
                 (Parameters, Launch_time, Finish_time, Type, Parameters_md5)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            (parameters, launch_time, finish_time, jtype.as_str(), fingerprint),
        )?;
        let id = self.conn.query_row(
            "SELECT Id FROM Jobs WHERE Type = ?1 AND Parameters_md5 = ?2",
            (jtype.as_str(), fingerprint),
            |row| row.get(0),
        )?;
        Ok((id, inserted > 0))
    }

    pub fn has_job(&self, jtype: JobType, fingerprint: &str) -> Result<bool> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT Id FROM Jobs WHERE Type = ?1 AND Parameters_md5 = ?2",
                (jtype.as_str(), fingerprint),
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.is_some())
    }

    /// Record a produced file. Paths under the working directory are stored
    /// relative to it and flagged, so the workdir stays relocatable.
    pub fn record_artifact(
        &self,
        jobid: i64,
        path: &Path,
        type_tag: &str,
        workdir: &Path,
    ) -> Result<i64> {
        let (stored, relative) = match path.strip_prefix(workdir) {
            Ok(rel) => (rel.to_path_buf(), true),
            Err(_) => (path.to_path_buf(), false),
        };
        self.conn.execute(
            "INSERT INTO Paths (Path, Type, JOBid, Workdir_relative) VALUES (?1, ?2, ?3, ?4)",
            (stored.display().to_string(), type_tag, jobid, relative as i64),
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn record_filter_output(&self, jobid: i64, path_id: i64, name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO Filter_Outputs (PathId, Name, JOBid) VALUES (?1, ?2, ?3)",
            (path_id, name, jobid),
        )?;
        Ok(())
    }

    pub fn record_normalize_output(
        &self,
        jobid: i64,
        input_path_id: i64,
        resolution: u64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO Normalize_Outputs (JOBid, Input, Resolution) VALUES (?1, ?2, ?3)",
            (jobid, input_path_id, resolution),
        )?;
        Ok(())
    }

    /// Job ids of a given type, ascending.
    pub fn job_ids_of_type(&self, jtype: JobType) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT Id FROM Jobs WHERE Type = ?1 ORDER BY Id")?;
        let ids = stmt
            .query_map([jtype.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Normalize job ids that produced biases at the given resolution.
    pub fn normalize_jobs_at_resolution(&self, resolution: u64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT JOBid FROM Normalize_Outputs WHERE Resolution = ?1 ORDER BY JOBid",
        )?;
        let ids = stmt
            .query_map([resolution], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Path of the first artifact of a job with the given type tag, with its
    /// workdir-relative flag.
    pub fn path_of_type(&self, jobid: i64, type_tag: &str) -> Result<Option<(PathBuf, bool)>> {
        let row = self
            .conn
            .query_row(
                "SELECT Path, Workdir_relative FROM Paths
                     WHERE JOBid = ?1 AND Type = ?2 ORDER BY Id LIMIT 1",
                (jobid, type_tag),
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(p, rel)| (PathBuf::from(p), rel != 0)))
    }

    /// The reads file a normalize job was computed from.
    pub fn normalize_input_path(&self, jobid: i64) -> Result<Option<(PathBuf, bool)>> {
        let row = self
            .conn
            .query_row(
                "SELECT Paths.Path, Paths.Workdir_relative
                     FROM Normalize_Outputs JOIN Paths ON Normalize_Outputs.Input = Paths.Id
                     WHERE Normalize_Outputs.JOBid = ?1 LIMIT 1",
                [jobid],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(p, rel)| (PathBuf::from(p), rel != 0)))
    }

    pub fn normalize_resolution(&self, jobid: i64) -> Result<Option<u64>> {
        let reso = self
            .conn
            .query_row(
                "SELECT Resolution FROM Normalize_Outputs WHERE JOBid = ?1 LIMIT 1",
                [jobid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(reso)
    }

    /// Named outputs of a filter job (e.g. its `valid-pairs` file).
    pub fn filter_output_paths(&self, jobid: i64, name: &str) -> Result<Vec<(PathBuf, bool)>> {
        let mut stmt = self.conn.prepare(
            "SELECT Paths.Path, Paths.Workdir_relative
                 FROM Filter_Outputs JOIN Paths ON Filter_Outputs.PathId = Paths.Id
                 WHERE Filter_Outputs.JOBid = ?1 AND Filter_Outputs.Name = ?2
                 ORDER BY Paths.Id",
        )?;
        let paths = stmt
            .query_map((jobid, name), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paths.into_iter().map(|(p, rel)| (PathBuf::from(p), rel != 0)).collect())
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| anyhow!("failed to close job ledger: {}", e))
    }
}

/// A locked ledger open for writing, optionally staged through a scratch
/// copy. [`LedgerSession::close`] commits the scratch copy back and releases
/// the lock; dropping the session without closing releases the lock but
/// discards scratch writes.
pub struct LedgerSession {
    ledger: Option<Ledger>,
    workdir_db: PathBuf,
    scratch: Option<tempfile::NamedTempFile>,
    _lock: LedgerLock,
}

impl LedgerSession {
    pub fn open(workdir: &Path, scratch_dir: Option<&Path>) -> Result<Self> {
        let lock = LedgerLock::acquire(workdir)?;
        let workdir_db = workdir.join(LEDGER_FILE);
        let (db_path, scratch) = match scratch_dir {
            None => (workdir_db.clone(), None),
            Some(dir) => {
                let tmp = tempfile::Builder::new()
                    .prefix("trace_")
                    .suffix(".db")
                    .tempfile_in(dir)
                    .with_context(|| format!("cannot create scratch ledger in {}", dir.display()))?;
                if workdir_db.exists() {
                    std::fs::copy(&workdir_db, tmp.path()).with_context(|| {
                        format!("cannot stage ledger to scratch: {}", tmp.path().display())
                    })?;
                }
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };
        let ledger = Ledger::open(&db_path)?;
        Ok(Self { ledger: Some(ledger), workdir_db, scratch, _lock: lock })
    }

    pub fn ledger(&self) -> &Ledger {
        self.ledger.as_ref().unwrap()
    }

    /// Close the database and, when staged, copy it back into the workdir.
    pub fn close(mut self) -> Result<()> {
        if let Some(ledger) = self.ledger.take() {
            ledger.close()?;
        }
        if let Some(tmp) = self.scratch.take() {
            std::fs::copy(tmp.path(), &self.workdir_db).with_context(|| {
                format!("cannot copy scratch ledger back to {}", self.workdir_db.display())
            })?;
        }
        Ok(())
    }
}
