//! Filesystem-backed run store.
//!
//! One pretty-printed JSON file per run, `<root>/<run_id>.json`. Writes
//! are atomic (temp file in the same directory, then rename) and every
//! write is schema-validated first, so a violating record never reaches
//! disk, even partially.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::domain::error::{Result, TallyError};
use crate::domain::run::RunRecord;
use crate::domain::validation::validate_record;

/// Filesystem store for persisted run records.
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.root.join(format!("{run_id}.json"))
    }

    /// Persist a run record. Validates first; atomic on disk.
    pub fn save(&self, run: &RunRecord) -> Result<()> {
        validate_record(run)?;

        let content = serde_json::to_string_pretty(run)?;
        let path = self.run_path(&run.run_id);
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&path).map_err(|e| TallyError::Io(e.error))?;
        tracing::debug!(run_id = %run.run_id, path = %path.display(), "run record persisted");
        Ok(())
    }

    /// Load one run by id.
    pub fn load(&self, run_id: &str) -> Result<RunRecord> {
        let path = self.run_path(run_id);
        let content = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TallyError::RunNotFound(run_id.to_string())
            } else {
                TallyError::Io(e)
            }
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load every run record in the store.
    ///
    /// Non-JSON files are skipped; a JSON file that fails to parse is an
    /// error (a corrupt record must surface, not vanish from sweeps).
    pub fn list(&self) -> Result<Vec<RunRecord>> {
        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            let run: RunRecord = serde_json::from_str(&content).map_err(|e| {
                TallyError::Storage(format!("corrupt run record {}: {e}", path.display()))
            })?;
            runs.push(run);
        }
        Ok(runs)
    }

    /// Runs eligible for a sweep: non-terminal status and at least
    /// `min_age_secs` old, sorted ascending by start time.
    ///
    /// Runs already past the max age are included so the verifier can
    /// record their terminal attempt; after that they are terminal and
    /// drop out of this listing.
    pub fn list_reconcilable(&self, now: i64, min_age_secs: i64) -> Result<Vec<RunRecord>> {
        let mut runs: Vec<RunRecord> = self
            .list()?
            .into_iter()
            .filter(|r| !r.status().is_terminal() && r.age_secs(now) >= min_age_secs)
            .collect();
        runs.sort_by_key(|r| r.start_timestamp);
        Ok(runs)
    }
}
