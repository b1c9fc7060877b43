//! Durable job ledger.
//!
//! One JSON file per batch holds every [`JobRecord`] plus [`LedgerMeta`].
//! The file is rewritten atomically after each mutation, so a crash leaves
//! either the previous or the new document on disk.

pub mod record;
pub mod store;

pub use record::{JobRecord, JobStatus, LedgerMeta, OverallStatus, Phase};
pub use store::{Ledger, LedgerDocument, LedgerSummary};
