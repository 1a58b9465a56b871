//! Saved job definitions, kept as a JSON object keyed by job number.
//!
//! The store is only read before a run and written after an edit; it is
//! never touched while transfers are in flight.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::BackupJob;

pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All saved jobs. A missing file is an empty store.
    pub fn load_all(&self) -> Result<BTreeMap<String, BackupJob>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    pub fn load(&self, job_id: &str) -> Result<Option<BackupJob>> {
        Ok(self.load_all()?.remove(job_id))
    }

    /// Insert or replace `job_id`.
    pub fn save(&self, job_id: &str, job: &BackupJob) -> Result<()> {
        let mut jobs = self.load_all()?;
        jobs.insert(job_id.to_string(), job.clone());
        self.write_all(&jobs)
    }

    /// Returns false if there was nothing to remove.
    pub fn remove(&self, job_id: &str) -> Result<bool> {
        let mut jobs = self.load_all()?;
        if jobs.remove(job_id).is_none() {
            return Ok(false);
        }
        self.write_all(&jobs)?;
        Ok(true)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.load_all()?.into_keys().collect())
    }

    fn write_all(&self, jobs: &BTreeMap<String, BackupJob>) -> Result<()> {
        let content = serde_json::to_string_pretty(jobs).context("Failed to serialize jobs")?;
        // Write-then-rename so an interrupted save never truncates the store.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
