//! Creation flow: prompt entries to queued remote jobs.

use std::sync::Arc;

use super::{retry_at, BatchStop};
use crate::api::{Classifier, CreateRequest, Outcome, SongApi};
use crate::backoff::BackoffPolicy;
use crate::config::{CreateConfig, ResponseFields, Settings};
use crate::ledger::{JobRecord, JobStatus, Ledger, OverallStatus, Phase};
use crate::prompt_source::PromptBatch;

/// What a creation run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationReport {
    /// Variants that reached `QUEUED` in this run.
    pub queued: usize,
    /// Variants that ended `CREATE_FAILED` in this run.
    pub failed: usize,
    /// Variants already created (or permanently failed) by an earlier run.
    pub skipped: usize,
    /// Prompt entries without a body.
    pub empty_prompts: usize,
    pub overall: OverallStatus,
    pub stop: Option<BatchStop>,
}

enum VariantResult {
    Queued,
    Failed,
    Stop(BatchStop),
}

/// Submits every (prompt, variant) pair and records the outcome in the
/// ledger.
pub struct CreationFlow {
    api: Arc<dyn SongApi>,
    classifier: Classifier,
    fields: ResponseFields,
    backoff: BackoffPolicy,
    config: CreateConfig,
}

impl CreationFlow {
    pub fn new(api: Arc<dyn SongApi>, settings: &Settings) -> Self {
        Self {
            api,
            classifier: Classifier::new(&settings.classifier),
            fields: settings.fields.clone(),
            backoff: BackoffPolicy::from_config(settings.backoff.clone()),
            config: settings.create.clone(),
        }
    }

    /// Replaces the backoff policy, e.g. with a fixed jitter source.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs the batch. With `resume`, pairs that already hold a remote job
    /// id or ended `CREATE_FAILED` are left untouched.
    ///
    /// Stops at the first batch-level condition (credit exhaustion or
    /// rejected credentials) and reports it in [`CreationReport::stop`].
    pub async fn run(
        &mut self,
        batch: &PromptBatch,
        ledger: &mut Ledger,
        resume: bool,
    ) -> CreationReport {
        let default_count = batch.default_count(self.config.default_count);
        let mut report = CreationReport {
            queued: 0,
            failed: 0,
            skipped: 0,
            empty_prompts: 0,
            overall: OverallStatus::Creating,
            stop: None,
        };

        if let Some(source) = batch.source() {
            ledger.meta_mut().prompt_source = Some(source.display().to_string());
        }
        ledger.set_overall(
            OverallStatus::Creating,
            "Jobs are created and logged live in this file",
        );

        tracing::info!(
            prompts = batch.prompts.len(),
            renders = batch.total_renders(self.config.default_count),
            resume,
            "Starting creation"
        );

        'prompts: for (position, entry) in batch.prompts.iter().enumerate() {
            let index = position as u32 + 1;
            let title = entry.title_or_default(index);
            if entry.body().is_empty() {
                tracing::warn!(index, title = %title, "Skipping prompt without body");
                report.empty_prompts += 1;
                continue;
            }
            let prompt_text = entry.prompt_text(&self.config.params_separator);

            for variant in 1..=entry.count_or(default_count) {
                if resume {
                    if let Some(existing) = ledger.get(index, variant) {
                        if existing.remote_job_id.is_some()
                            || existing.status == JobStatus::CreateFailed
                        {
                            tracing::debug!(index, variant, status = %existing.status, "Already handled, skipping");
                            report.skipped += 1;
                            continue;
                        }
                    }
                }

                match self
                    .create_variant(ledger, index, variant, &title, &prompt_text)
                    .await
                {
                    VariantResult::Queued => report.queued += 1,
                    VariantResult::Failed => report.failed += 1,
                    VariantResult::Stop(stop) => {
                        report.stop = Some(stop);
                        break 'prompts;
                    }
                }

                tokio::time::sleep(self.config.courtesy_pause()).await;
            }
        }

        let (overall, note) = self.batch_outcome(ledger, report.stop.as_ref());
        ledger.set_overall(overall, note);
        report.overall = overall;

        tracing::info!(
            queued = report.queued,
            failed = report.failed,
            skipped = report.skipped,
            overall = ?overall,
            "Creation finished"
        );
        report
    }

    async fn create_variant(
        &mut self,
        ledger: &mut Ledger,
        index: u32,
        variant: u32,
        title: &str,
        prompt_text: &str,
    ) -> VariantResult {
        let entering = JobRecord::new(index, variant, title, prompt_text);
        if ledger.get(index, variant).is_some() {
            // A resumed pair starts over; nothing from the earlier attempt carries.
            ledger.update(index, variant, move |r| *r = entering);
        } else {
            ledger.record(entering);
        }
        tracing::info!(index, variant, title = %title, "Creating");

        let request = CreateRequest::new(prompt_text);
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 0..max_attempts {
            let result = self.api.create(&request).await;
            match self.classifier.classify_create(result, &self.fields) {
                Outcome::Success(job_id) => {
                    tracing::info!(index, variant, job_id = %job_id, attempts = attempt + 1, "Job queued");
                    ledger.update(index, variant, |r| {
                        r.phase = Phase::Create;
                        r.status = JobStatus::Queued;
                        r.remote_job_id = Some(job_id);
                        r.http_status = Some(200);
                        r.error_reason = None;
                        r.next_retry_at = None;
                    });
                    return VariantResult::Queued;
                }
                Outcome::Retryable {
                    failure,
                    class,
                    retry_after,
                } => {
                    let consumed = attempt + 1;
                    let wait = (consumed < max_attempts)
                        .then(|| self.backoff.delay_with_hint(attempt, retry_after));
                    tracing::warn!(
                        index,
                        variant,
                        attempt = consumed,
                        max_attempts,
                        class = ?class,
                        http_status = ?failure.http_status,
                        wait = ?wait,
                        reason = %failure.reason,
                        "Transient create failure"
                    );
                    last_reason = failure.reason.clone();
                    ledger.update(index, variant, |r| {
                        r.status = JobStatus::Retrying;
                        if failure.http_status.is_some() {
                            r.http_status = failure.http_status;
                        }
                        r.error_reason = Some(failure.reason);
                        r.retry_count = consumed;
                        r.next_retry_at = wait.map(retry_at);
                    });
                    if let Some(wait) = wait {
                        tokio::time::sleep(wait).await;
                    }
                }
                Outcome::Permanent(failure) => {
                    tracing::warn!(index, variant, http_status = ?failure.http_status, reason = %failure.reason, "Create failed");
                    ledger.update(index, variant, |r| {
                        r.fail_with(JobStatus::CreateFailed, failure.http_status, failure.reason)
                    });
                    return VariantResult::Failed;
                }
                Outcome::CreditExhausted(failure) => {
                    tracing::error!(index, variant, reason = %failure.reason, "Credits exhausted, stopping batch");
                    let reason = failure.reason.clone();
                    ledger.update(index, variant, |r| {
                        r.fail_with(JobStatus::OnHoldCredits, failure.http_status, failure.reason)
                    });
                    return VariantResult::Stop(BatchStop::CreditsExhausted {
                        index,
                        variant,
                        reason,
                    });
                }
                Outcome::Unauthorized(failure) => {
                    tracing::error!(index, variant, reason = %failure.reason, "API key rejected, stopping batch");
                    let reason = failure.reason.clone();
                    ledger.update(index, variant, |r| {
                        r.fail_with(JobStatus::CreateFailed, failure.http_status, failure.reason)
                    });
                    return VariantResult::Stop(BatchStop::Unauthorized { reason });
                }
            }
        }

        let reason = format!("max retries ({}) exceeded: {}", max_attempts, last_reason);
        tracing::warn!(index, variant, reason = %reason, "Create gave up");
        ledger.update(index, variant, |r| {
            r.fail_with(JobStatus::CreateFailed, None, reason)
        });
        VariantResult::Failed
    }

    fn batch_outcome(
        &self,
        ledger: &Ledger,
        stop: Option<&BatchStop>,
    ) -> (OverallStatus, String) {
        match stop {
            Some(BatchStop::CreditsExhausted { index, variant, .. }) => (
                OverallStatus::OnHoldCredits,
                format!(
                    "Credits exhausted at [{}] v{}; top up and run `create --resume`",
                    index, variant
                ),
            ),
            Some(BatchStop::Unauthorized { .. }) => (
                OverallStatus::CreateFailed,
                "API key rejected (HTTP 401); check SUNO_API_KEY".to_string(),
            ),
            None => {
                let any_created = ledger
                    .items()
                    .iter()
                    .any(|r| !r.status.is_create_failure());
                if any_created {
                    (
                        OverallStatus::ReadyToPoll,
                        "Creation finished; run `poll` to fetch audio".to_string(),
                    )
                } else {
                    (
                        OverallStatus::CreateFailed,
                        "No job could be created".to_string(),
                    )
                }
            }
        }
    }
}
