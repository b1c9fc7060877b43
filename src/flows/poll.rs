//! Polling flow: queued remote jobs to downloaded audio.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use super::{retry_at, BatchStop};
use crate::api::{search, Classifier, Failure, Outcome, SongApi, WaitClass};
use crate::backoff::BackoffPolicy;
use crate::blob::BlobStore;
use crate::config::{PollConfig, ResponseFields, Settings, StatusClass, StatusVocabulary};
use crate::error::{BlobError, TransportError};
use crate::ledger::{JobRecord, JobStatus, Ledger, OverallStatus, Phase};

/// Why a polling run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStop {
    /// No record had a pending job.
    NothingToWatch,
    /// Every watched record reached a terminal status.
    AllTerminal,
    /// The wall-clock budget ran out.
    MaxWaitExceeded,
    /// Some records used up their poll cycles without finishing.
    Incomplete,
    Aborted(BatchStop),
}

/// What a polling run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub watched: usize,
    pub done: usize,
    pub failed: usize,
    pub pending: usize,
    pub overall: OverallStatus,
    pub stop: PollStop,
}

impl PollReport {
    pub fn batch_stop(&self) -> Option<&BatchStop> {
        match &self.stop {
            PollStop::Aborted(stop) => Some(stop),
            _ => None,
        }
    }
}

/// Polling state of one watched record, carried across passes.
struct Watched {
    index: u32,
    variant: u32,
    job_id: String,
    title: String,
    checks: u32,
    failures: u32,
    due: Instant,
    settled: bool,
}

impl Watched {
    fn from_record(record: &JobRecord, now: Instant) -> Option<Self> {
        Some(Self {
            index: record.index,
            variant: record.variant,
            job_id: record.remote_job_id.clone()?,
            title: record.title.clone(),
            checks: 0,
            failures: 0,
            due: now,
            settled: false,
        })
    }
}

/// Result of one status check.
enum Step {
    Terminal,
    Again(Duration),
    Abort(BatchStop),
}

/// Records watched by a polling run: created, not yet downloaded, not
/// already finished.
pub fn is_watched(record: &JobRecord) -> bool {
    record.remote_job_id.is_some()
        && record.audio_path.is_none()
        && !matches!(record.status, JobStatus::Done | JobStatus::PollFailed)
}

/// Polls every pending job in turn and downloads finished audio.
pub struct PollingFlow {
    api: Arc<dyn SongApi>,
    classifier: Classifier,
    fields: ResponseFields,
    vocabulary: StatusVocabulary,
    backoff: BackoffPolicy,
    config: PollConfig,
    blobs: BlobStore,
}

impl PollingFlow {
    pub fn new(api: Arc<dyn SongApi>, settings: &Settings) -> Self {
        Self {
            api,
            classifier: Classifier::new(&settings.classifier),
            fields: settings.fields.clone(),
            vocabulary: settings.vocabulary.clone(),
            backoff: BackoffPolicy::from_config(settings.backoff.clone()),
            config: settings.poll.clone(),
            blobs: BlobStore::new(&settings.paths.output_dir),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_blob_store(mut self, blobs: BlobStore) -> Self {
        self.blobs = blobs;
        self
    }

    /// Polls until every watched record is terminal or the wall-clock
    /// budget is spent. Each pass checks every unsettled record that is due
    /// once, so a job stuck in a pending state never starves the others.
    /// Records still pending at the end are left as they are so a later run
    /// can pick them up.
    ///
    /// # Errors
    ///
    /// Fails before any request if the output directory cannot be created.
    pub async fn run(&mut self, ledger: &mut Ledger) -> Result<PollReport, BlobError> {
        self.blobs.ensure_dir().await?;

        let now = Instant::now();
        let mut watch: Vec<Watched> = ledger
            .items()
            .iter()
            .filter(|r| is_watched(r))
            .filter_map(|r| Watched::from_record(r, now))
            .collect();

        if watch.is_empty() {
            tracing::info!("No pending jobs to poll");
            return Ok(PollReport {
                watched: 0,
                done: 0,
                failed: 0,
                pending: 0,
                overall: ledger.meta().overall_status,
                stop: PollStop::NothingToWatch,
            });
        }

        ledger.meta_mut().last_poll = Some(Utc::now());
        ledger.set_overall(OverallStatus::Polling, "Polling for finished audio");

        let deadline = now + self.config.max_wait();
        tracing::info!(
            watched = watch.len(),
            max_wait_secs = self.config.max_wait_secs,
            out_dir = %self.blobs.out_dir().display(),
            "Starting polling"
        );

        let mut aborted = None;
        let mut deadline_hit = false;
        let mut pass: u32 = 0;
        'passes: loop {
            let Some(due) = watch.iter().filter(|w| !w.settled).map(|w| w.due).min() else {
                break;
            };
            if due >= deadline {
                deadline_hit = true;
                break;
            }
            tokio::time::sleep_until(due).await;
            pass += 1;
            tracing::debug!(pass, "Polling pass");

            for w in watch
                .iter_mut()
                .filter(|w| !w.settled && w.due <= Instant::now())
            {
                if Instant::now() >= deadline {
                    deadline_hit = true;
                    break 'passes;
                }
                match self.check(ledger, w).await {
                    Step::Terminal => w.settled = true,
                    Step::Again(_) if w.checks >= self.config.max_cycles => {
                        self.give_up(ledger, w);
                        w.settled = true;
                    }
                    Step::Again(wait) => w.due = Instant::now() + wait,
                    Step::Abort(stop) => {
                        aborted = Some(stop);
                        break 'passes;
                    }
                }
            }
        }

        let mut report = PollReport {
            watched: watch.len(),
            done: 0,
            failed: 0,
            pending: 0,
            overall: OverallStatus::Polling,
            stop: PollStop::Incomplete,
        };
        for w in &watch {
            match ledger.get(w.index, w.variant).map(|r| r.status) {
                Some(JobStatus::Done) => report.done += 1,
                Some(JobStatus::PollFailed) => report.failed += 1,
                _ => report.pending += 1,
            }
        }

        let (overall, note) = if report.pending == 0 {
            (
                OverallStatus::Done,
                format!("Polling finished: {} done, {} failed", report.done, report.failed),
            )
        } else {
            (
                OverallStatus::Polling,
                format!(
                    "Polling incomplete: {} job(s) still pending; run `poll` again",
                    report.pending
                ),
            )
        };
        ledger.set_overall(overall, note);
        report.overall = overall;

        if deadline_hit {
            tracing::warn!(
                pending = report.pending,
                max_wait_secs = self.config.max_wait_secs,
                "Max wait exceeded, leaving remaining jobs for a later run"
            );
        }
        report.stop = match aborted {
            Some(stop) => PollStop::Aborted(stop),
            None if report.pending == 0 => PollStop::AllTerminal,
            None if deadline_hit => PollStop::MaxWaitExceeded,
            None => PollStop::Incomplete,
        };

        tracing::info!(
            passes = pass,
            done = report.done,
            failed = report.failed,
            pending = report.pending,
            overall = ?overall,
            "Polling finished"
        );
        Ok(report)
    }

    /// Issues one status request for `w` and applies the reply.
    async fn check(&mut self, ledger: &mut Ledger, w: &mut Watched) -> Step {
        let (index, variant) = (w.index, w.variant);
        if w.checks == 0 {
            ledger.update(index, variant, |r| {
                r.phase = Phase::Poll;
                r.status = JobStatus::Polling;
                r.next_retry_at = None;
            });
            tracing::info!(index, variant, job_id = %w.job_id, "Polling");
        }
        w.checks += 1;

        let result = self.api.status(&w.job_id).await;
        let body = match self.classifier.classify(result) {
            Outcome::Success(body) => body,
            Outcome::Retryable {
                failure,
                class,
                retry_after,
            } => return Step::Again(self.transient(ledger, w, failure, class, retry_after)),
            // Status checks do not spend credits; wait it out.
            Outcome::CreditExhausted(failure) => {
                return Step::Again(self.transient(ledger, w, failure, WaitClass::RateLimited, None));
            }
            Outcome::Permanent(failure) => {
                tracing::warn!(index, variant, job_id = %w.job_id, reason = %failure.reason, "Status check failed");
                ledger.update(index, variant, |r| {
                    r.fail_with(JobStatus::PollFailed, failure.http_status, failure.reason)
                });
                return Step::Terminal;
            }
            Outcome::Unauthorized(failure) => {
                tracing::error!(reason = %failure.reason, "API key rejected, stopping polling");
                let reason = failure.reason.clone();
                ledger.update(index, variant, |r| {
                    r.http_status = failure.http_status;
                    r.error_reason = Some(failure.reason);
                });
                return Step::Abort(BatchStop::Unauthorized { reason });
            }
        };

        w.failures = 0;
        let label = search(&body, &self.fields.status_keys, &self.fields.id_containers);
        let audio_url = search(&body, &self.fields.audio_url_keys, &self.fields.audio_containers);
        let class = label.as_deref().and_then(|l| self.vocabulary.classify(l));
        tracing::debug!(
            index,
            variant,
            check = w.checks,
            status = label.as_deref().unwrap_or("-"),
            has_audio = audio_url.is_some(),
            "Status reply"
        );

        let api_status = label.clone();
        ledger.update(index, variant, |r| {
            r.http_status = Some(200);
            r.error_reason = None;
            r.next_retry_at = None;
            r.retry_count = 0;
            if api_status.is_some() {
                r.api_status = api_status;
            }
        });

        match (class, audio_url) {
            (Some(StatusClass::Failed), _) => {
                let reason = format!(
                    "job reported {}",
                    label.as_deref().unwrap_or("failure")
                );
                tracing::warn!(index, variant, job_id = %w.job_id, reason = %reason, "Job failed upstream");
                ledger.update(index, variant, |r| {
                    r.fail_with(JobStatus::PollFailed, Some(200), reason)
                });
                Step::Terminal
            }
            (Some(StatusClass::Succeeded), None) => {
                tracing::warn!(index, variant, job_id = %w.job_id, "Completed without audio URL");
                ledger.update(index, variant, |r| {
                    r.fail_with(JobStatus::PollFailed, Some(200), "completed without audio URL")
                });
                Step::Terminal
            }
            (Some(StatusClass::Succeeded), Some(url)) | (None, Some(url)) => {
                self.download(ledger, index, variant, &w.title, &w.job_id, &url)
                    .await;
                Step::Terminal
            }
            (Some(StatusClass::Pending), _) | (None, None) => Step::Again(self.config.interval()),
        }
    }

    fn give_up(&self, ledger: &mut Ledger, w: &Watched) {
        let reason = format!(
            "no terminal status after {} status checks",
            self.config.max_cycles
        );
        tracing::warn!(
            index = w.index,
            variant = w.variant,
            job_id = %w.job_id,
            reason = %reason,
            "Giving up on job for this run"
        );
        ledger.update(w.index, w.variant, |r| r.error_reason = Some(reason));
    }

    /// Records a transient failure and returns the backoff before the
    /// record's next check.
    fn transient(
        &mut self,
        ledger: &mut Ledger,
        w: &mut Watched,
        failure: Failure,
        class: WaitClass,
        retry_after: Option<Duration>,
    ) -> Duration {
        let wait = self.backoff.delay_with_hint(w.failures, retry_after);
        w.failures += 1;
        let consecutive = w.failures;
        tracing::warn!(
            index = w.index,
            variant = w.variant,
            class = ?class,
            http_status = ?failure.http_status,
            consecutive,
            wait = ?wait,
            reason = %failure.reason,
            "Transient status failure"
        );
        ledger.update(w.index, w.variant, |r| {
            r.status = JobStatus::Polling;
            if failure.http_status.is_some() {
                r.http_status = failure.http_status;
            }
            r.error_reason = Some(failure.reason);
            r.retry_count = consecutive;
            r.next_retry_at = Some(retry_at(wait));
        });
        wait
    }

    async fn download(
        &mut self,
        ledger: &mut Ledger,
        index: u32,
        variant: u32,
        title: &str,
        job_id: &str,
        url: &str,
    ) {
        let name = BlobStore::file_name(index, title, variant, job_id, url);
        ledger.update(index, variant, |r| {
            r.status = JobStatus::Downloading;
            r.audio_url = Some(url.to_string());
        });
        tracing::info!(index, variant, url = %url, file = %name, "Downloading");

        let mut pending = match self.blobs.begin(&name).await {
            Ok(pending) => pending,
            Err(err) => {
                self.download_failed(ledger, index, variant, None, format!("could not open output file: {}", err));
                return;
            }
        };

        match self.api.download(url, pending.writer()).await {
            Ok(_) => match pending.commit().await {
                Ok(stored) => {
                    tracing::info!(
                        index,
                        variant,
                        path = %stored.path.display(),
                        bytes = stored.bytes,
                        "Audio saved"
                    );
                    ledger.update(index, variant, |r| {
                        r.status = JobStatus::Done;
                        r.audio_path = Some(stored.path.display().to_string());
                        r.audio_bytes = Some(stored.bytes);
                        r.audio_sha256 = Some(stored.sha256);
                        r.error_reason = None;
                    });
                }
                Err(err) => {
                    self.download_failed(ledger, index, variant, None, format!("could not store audio: {}", err));
                }
            },
            Err(err) => {
                pending.discard().await;
                let http_status = match err {
                    TransportError::DownloadStatus { status } => Some(status),
                    _ => None,
                };
                self.download_failed(ledger, index, variant, http_status, format!("download failed: {}", err));
            }
        }
    }

    fn download_failed(
        &self,
        ledger: &mut Ledger,
        index: u32,
        variant: u32,
        http_status: Option<u16>,
        reason: String,
    ) {
        tracing::warn!(index, variant, reason = %reason, "Download failed");
        ledger.update(index, variant, |r| {
            r.fail_with(JobStatus::PollFailed, http_status, reason)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: JobStatus, job_id: Option<&str>, audio: Option<&str>) -> JobRecord {
        let mut record = JobRecord::new(1, 1, "Song", "text").with_status(status);
        record.remote_job_id = job_id.map(str::to_string);
        record.audio_path = audio.map(str::to_string);
        record
    }

    #[test]
    fn test_watch_list_selection() {
        assert!(is_watched(&record(JobStatus::Queued, Some("j"), None)));
        assert!(is_watched(&record(JobStatus::Polling, Some("j"), None)));
        assert!(is_watched(&record(JobStatus::Downloading, Some("j"), None)));
        assert!(!is_watched(&record(JobStatus::Queued, None, None)));
        assert!(!is_watched(&record(JobStatus::CreateFailed, None, None)));
        assert!(!is_watched(&record(JobStatus::Done, Some("j"), None)));
        assert!(!is_watched(&record(JobStatus::PollFailed, Some("j"), None)));
        assert!(!is_watched(&record(JobStatus::Polling, Some("j"), Some("out/a.mp3"))));
    }
}
