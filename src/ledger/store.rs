//! File-backed ledger with atomic flushes.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::record::{JobRecord, JobStatus, LedgerMeta, OverallStatus};
use crate::error::LedgerError;

/// On-disk shape: `{"meta": {...}, "items": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub meta: LedgerMeta,
    #[serde(default)]
    pub items: Vec<JobRecord>,
}

/// Ordered job records plus batch metadata, mirrored to one JSON file.
///
/// A single process owns the file for the duration of a run; concurrent
/// writers against the same path are not supported.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    doc: LedgerDocument,
}

impl Ledger {
    /// An empty ledger in `CREATING` state. Nothing is written until the
    /// first flush.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            doc: LedgerDocument {
                meta: LedgerMeta::new(),
                items: Vec::new(),
            },
        }
    }

    /// Loads a ledger written by a previous run.
    ///
    /// # Errors
    ///
    /// `LedgerError::MissingLedger` if the file does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if !path.exists() {
            return Err(LedgerError::MissingLedger(path));
        }
        let raw = std::fs::read_to_string(&path)?;
        let doc: LedgerDocument = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.display(), items = doc.items.len(), "Loaded ledger");
        Ok(Self { path, doc })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &LedgerMeta {
        &self.doc.meta
    }

    pub fn meta_mut(&mut self) -> &mut LedgerMeta {
        &mut self.doc.meta
    }

    pub fn items(&self) -> &[JobRecord] {
        &self.doc.items
    }

    pub fn document(&self) -> &LedgerDocument {
        &self.doc
    }

    pub fn len(&self) -> usize {
        self.doc.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.items.is_empty()
    }

    pub fn get(&self, index: u32, variant: u32) -> Option<&JobRecord> {
        self.doc
            .items
            .iter()
            .find(|r| r.index == index && r.variant == variant)
    }

    /// Inserts or merges by `(index, variant)` and stamps `last_update`.
    pub fn upsert(&mut self, record: JobRecord) -> &JobRecord {
        let now = Utc::now();
        let key = record.key();
        let position = self.doc.items.iter().position(|r| r.key() == key);
        let slot = match position {
            Some(pos) => {
                let existing = &mut self.doc.items[pos];
                existing.merge_from(record);
                existing
            }
            None => {
                self.doc.items.push(record);
                let last = self.doc.items.len() - 1;
                &mut self.doc.items[last]
            }
        };
        slot.last_update = now;
        slot
    }

    /// Upserts and flushes. A failed flush is logged and otherwise ignored;
    /// the in-memory ledger stays authoritative for the rest of the run.
    pub fn record(&mut self, record: JobRecord) {
        self.upsert(record);
        self.flush_best_effort();
    }

    /// Applies `change` to an existing record in place, stamps
    /// `last_update` and flushes. Unlike [`Ledger::upsert`], fields can be
    /// cleared. Returns the updated record, or `None` if the key is unknown.
    pub fn update(
        &mut self,
        index: u32,
        variant: u32,
        change: impl FnOnce(&mut JobRecord),
    ) -> Option<JobRecord> {
        let record = self
            .doc
            .items
            .iter_mut()
            .find(|r| r.index == index && r.variant == variant)?;
        change(record);
        record.last_update = Utc::now();
        let snapshot = record.clone();
        self.flush_best_effort();
        Some(snapshot)
    }

    /// Sets the batch status and note, then flushes best-effort.
    pub fn set_overall(&mut self, status: OverallStatus, note: impl Into<String>) {
        self.doc.meta.overall_status = status;
        self.doc.meta.note = note.into();
        self.flush_best_effort();
    }

    /// Writes the whole document atomically: temp file in the same
    /// directory, fsync, rename over the target.
    pub fn flush(&self) -> Result<(), LedgerError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_vec_pretty(&self.doc)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| LedgerError::Persist {
            path: self.path.clone(),
            reason: e.error.to_string(),
        })?;
        Ok(())
    }

    pub fn flush_best_effort(&self) {
        if let Err(err) = self.flush() {
            tracing::error!(path = %self.path.display(), error = %err, "Ledger flush failed");
        }
    }

    /// Record count per status.
    pub fn summary(&self) -> LedgerSummary {
        let mut by_status = BTreeMap::new();
        for record in &self.doc.items {
            *by_status.entry(record.status).or_insert(0usize) += 1;
        }
        LedgerSummary {
            total: self.doc.items.len(),
            by_status,
        }
    }
}

/// Counts per status, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub total: usize,
    pub by_status: BTreeMap<JobStatus, usize>,
}

impl LedgerSummary {
    pub fn count(&self, status: JobStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

impl std::fmt::Display for LedgerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} record(s)", self.total)?;
        for (status, count) in &self.by_status {
            write!(f, ", {} {}", count, status)?;
        }
        Ok(())
    }
}
