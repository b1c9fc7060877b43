//! Timestamped snapshots of the prompt file and ledger.
//!
//! Archival is best-effort: every failure is logged and swallowed so that
//! it never changes the outcome of a batch.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Timestamp format used in archive file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Copies batch inputs and outputs into an archive directory.
#[derive(Debug, Clone)]
pub struct Archiver {
    dir: PathBuf,
}

impl Archiver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copies `source` to `<prefix>_<ts>.json`, appending `_2`, `_3`, ...
    /// when that name is taken. Returns the destination path.
    pub fn snapshot(
        &self,
        source: &Path,
        prefix: &str,
        at: DateTime<Utc>,
    ) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let stamp = at.format(TIMESTAMP_FORMAT).to_string();
        let mut dest = self.dir.join(format!("{}_{}.json", prefix, stamp));
        let mut suffix = 2;
        while dest.exists() {
            dest = self.dir.join(format!("{}_{}_{}.json", prefix, stamp, suffix));
            suffix += 1;
        }
        std::fs::copy(source, &dest)?;
        Ok(dest)
    }

    /// Archives the prompt file and the freshly created ledger.
    pub fn after_create(&self, prompt_file: &Path, ledger_file: &Path) -> Vec<PathBuf> {
        let now = Utc::now();
        [(prompt_file, "prompts"), (ledger_file, "jobs_created")]
            .into_iter()
            .filter_map(|(source, prefix)| self.try_snapshot(source, prefix, now))
            .collect()
    }

    /// Archives the ledger after polling.
    pub fn after_poll(&self, ledger_file: &Path) -> Option<PathBuf> {
        self.try_snapshot(ledger_file, "jobs_polled", Utc::now())
    }

    fn try_snapshot(&self, source: &Path, prefix: &str, at: DateTime<Utc>) -> Option<PathBuf> {
        match self.snapshot(source, prefix, at) {
            Ok(dest) => {
                tracing::info!(source = %source.display(), dest = %dest.display(), "Archived");
                Some(dest)
            }
            Err(err) => {
                tracing::warn!(source = %source.display(), error = %err, "Archiving failed");
                None
            }
        }
    }
}
