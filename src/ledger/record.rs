//! Job record and batch metadata types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which flow currently owns a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Create,
    Poll,
}

/// Lifecycle status of a single render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Creating,
    Queued,
    Retrying,
    OnHoldCredits,
    CreateFailed,
    Polling,
    Downloading,
    Done,
    PollFailed,
}

impl JobStatus {
    /// No further transition happens without a new run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::CreateFailed | Self::PollFailed | Self::OnHoldCredits
        )
    }

    /// Creation did not produce a job.
    pub fn is_create_failure(&self) -> bool {
        matches!(self, Self::CreateFailed | Self::OnHoldCredits)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Queued => "QUEUED",
            Self::Retrying => "RETRYING",
            Self::OnHoldCredits => "ON_HOLD_CREDITS",
            Self::CreateFailed => "CREATE_FAILED",
            Self::Polling => "POLLING",
            Self::Downloading => "DOWNLOADING",
            Self::Done => "DONE",
            Self::PollFailed => "POLL_FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Creating,
    ReadyToPoll,
    Polling,
    Done,
    CreateFailed,
    OnHoldCredits,
}

/// One (prompt index, variant) unit of work.
///
/// `Option` fields left as `None` are preserved when the record is merged
/// into an existing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub index: u32,
    pub variant: u32,
    pub title: String,
    pub prompt_text: String,
    #[serde(default, alias = "job_id")]
    pub remote_job_id: Option<String>,
    pub phase: Phase,
    pub status: JobStatus,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default, alias = "error_expl")]
    pub error_reason: Option<String>,
    #[serde(default, alias = "retries")]
    pub retry_count: u32,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub api_status: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub audio_path: Option<String>,
    #[serde(default)]
    pub audio_bytes: Option<u64>,
    #[serde(default)]
    pub audio_sha256: Option<String>,
    pub last_update: DateTime<Utc>,
}

impl JobRecord {
    /// A fresh record entering creation.
    pub fn new(
        index: u32,
        variant: u32,
        title: impl Into<String>,
        prompt_text: impl Into<String>,
    ) -> Self {
        Self {
            index,
            variant,
            title: title.into(),
            prompt_text: prompt_text.into(),
            remote_job_id: None,
            phase: Phase::Create,
            status: JobStatus::Creating,
            http_status: None,
            error_reason: None,
            retry_count: 0,
            next_retry_at: None,
            api_status: None,
            audio_url: None,
            audio_path: None,
            audio_bytes: None,
            audio_sha256: None,
            last_update: Utc::now(),
        }
    }

    pub fn key(&self) -> (u32, u32) {
        (self.index, self.variant)
    }

    /// Short label for log lines.
    pub fn label(&self) -> String {
        format!("[{}] {} v{}", self.index, self.title, self.variant)
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    /// Records a failure reason and, when known, the HTTP status.
    pub fn fail_with(&mut self, status: JobStatus, http_status: Option<u16>, reason: impl Into<String>) {
        self.status = status;
        if http_status.is_some() {
            self.http_status = http_status;
        }
        self.error_reason = Some(reason.into());
        self.next_retry_at = None;
    }

    /// Overwrites this record with `update`, keeping fields `update` leaves
    /// as `None`.
    pub(crate) fn merge_from(&mut self, update: JobRecord) {
        self.title = update.title;
        self.prompt_text = update.prompt_text;
        self.phase = update.phase;
        self.status = update.status;
        self.retry_count = update.retry_count;
        keep_some(&mut self.remote_job_id, update.remote_job_id);
        keep_some(&mut self.http_status, update.http_status);
        keep_some(&mut self.error_reason, update.error_reason);
        keep_some(&mut self.next_retry_at, update.next_retry_at);
        keep_some(&mut self.api_status, update.api_status);
        keep_some(&mut self.audio_url, update.audio_url);
        keep_some(&mut self.audio_path, update.audio_path);
        keep_some(&mut self.audio_bytes, update.audio_bytes);
        keep_some(&mut self.audio_sha256, update.audio_sha256);
    }
}

fn keep_some<T>(slot: &mut Option<T>, update: Option<T>) {
    if update.is_some() {
        *slot = update;
    }
}

/// Batch-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerMeta {
    #[serde(default = "Uuid::new_v4")]
    pub batch_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub overall_status: OverallStatus,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub prompt_source: Option<String>,
    #[serde(default)]
    pub last_poll: Option<DateTime<Utc>>,
}

impl LedgerMeta {
    pub fn new() -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            created_at: Utc::now(),
            overall_status: OverallStatus::Creating,
            note: "Jobs are created and logged live in this file".to_string(),
            prompt_source: None,
            last_poll: None,
        }
    }
}

impl Default for LedgerMeta {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::OnHoldCredits).expect("serialize");
        assert_eq!(json, "\"ON_HOLD_CREDITS\"");
        let json = serde_json::to_string(&OverallStatus::ReadyToPoll).expect("serialize");
        assert_eq!(json, "\"READY_TO_POLL\"");
        assert_eq!(JobStatus::PollFailed.to_string(), "POLL_FAILED");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::CreateFailed.is_terminal());
        assert!(JobStatus::PollFailed.is_terminal());
        assert!(JobStatus::OnHoldCredits.is_terminal());
        assert!(!JobStatus::Polling.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_merge_preserves_absent_fields() {
        let mut existing = JobRecord::new(1, 1, "Song", "text");
        existing.remote_job_id = Some("job-1".to_string());
        existing.error_reason = Some("HTTP 503".to_string());

        let update = JobRecord::new(1, 1, "Song", "text").with_status(JobStatus::Polling);
        existing.merge_from(update);

        assert_eq!(existing.status, JobStatus::Polling);
        assert_eq!(existing.remote_job_id.as_deref(), Some("job-1"));
        assert_eq!(existing.error_reason.as_deref(), Some("HTTP 503"));
    }

    #[test]
    fn test_legacy_field_aliases() {
        let raw = r#"{
            "index": 3, "variant": 2, "title": "Old", "prompt_text": "p",
            "job_id": "legacy-7", "phase": "CREATE", "status": "QUEUED",
            "http_status": 200, "retries": 4, "error_expl": "old reason",
            "last_update": "2025-01-01T00:00:00Z"
        }"#;
        let record: JobRecord = serde_json::from_str(raw).expect("deserialize");
        assert_eq!(record.remote_job_id.as_deref(), Some("legacy-7"));
        assert_eq!(record.retry_count, 4);
        assert_eq!(record.error_reason.as_deref(), Some("old reason"));
        assert_eq!(record.status, JobStatus::Queued);
    }
}
