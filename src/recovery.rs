// ABOUTME: Decides retry versus dead-letter for every failed job, via classification
// ABOUTME: Writes dead-letter records and raises alerts before the queue moves on
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

use crate::classify::{backoff_delay, classify};
use crate::constants::queue::DEAD_LETTER_ERROR_EXCERPT_LEN;
use crate::errors::AppError;
use crate::queue::worker::{JobOutcomeHandler, RetryDecision};
use crate::queue::Job;
use crate::scheduler::{SyncJobPayload, SyncScheduler};
use crate::storage::{Alert, AlertSink, DeadLetterRecord, DeadLetterStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Single authority on job retry decisions
///
/// The classifier's per-kind budget overrides the queue's own attempt hint:
/// a non-retryable kind dead-letters on the first failure no matter what the
/// producer configured.
pub struct ErrorRecoveryCoordinator {
    dead_letters: Arc<dyn DeadLetterStore>,
    alerts: Arc<dyn AlertSink>,
    scheduler: Arc<SyncScheduler>,
}

impl ErrorRecoveryCoordinator {
    /// Create a coordinator
    #[must_use]
    pub fn new(
        dead_letters: Arc<dyn DeadLetterStore>,
        alerts: Arc<dyn AlertSink>,
        scheduler: Arc<SyncScheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            dead_letters,
            alerts,
            scheduler,
        })
    }

    async fn dead_letter(
        &self,
        job: &Job,
        error: &AppError,
        classification: &crate::classify::ErrorClassification,
    ) {
        let message = error.to_string();
        let excerpt: String = message.chars().take(DEAD_LETTER_ERROR_EXCERPT_LEN).collect();

        let record = DeadLetterRecord {
            job_id: job.id.clone(),
            error_kind: classification.kind,
            error_excerpt: excerpt,
            attempts_made: job.attempts_made,
            requires_manual_intervention: classification.requires_manual_intervention,
            failed_at: Utc::now(),
            original_payload: job.payload.clone(),
        };

        if let Err(e) = self.dead_letters.create_record(&record).await {
            // The job still fails; losing the record is an audit gap, not a
            // reason to retry the job
            error!(job_id = %job.id, error = %e, "Failed to persist dead-letter record");
        }

        if classification.requires_manual_intervention {
            let account_id = sync_payload(job).map(|p| p.account_id);
            let alert = Alert {
                account_id,
                job_id: job.id.clone(),
                error_kind: classification.kind,
                attempts_made: job.attempts_made,
                message: format!(
                    "Job {} gave up after {} attempt(s) with {} error; operator action required",
                    job.id, job.attempts_made, classification.kind
                ),
            };
            if let Err(e) = self.alerts.raise(&alert).await {
                error!(job_id = %job.id, error = %e, "Failed to raise alert");
            }
        }
    }
}

#[async_trait::async_trait]
impl JobOutcomeHandler for ErrorRecoveryCoordinator {
    async fn on_completed(&self, job: &Job, _result: &serde_json::Value) {
        let Some(payload) = sync_payload(job) else {
            debug!(job_id = %job.id, "Completed job carries no sync payload");
            return;
        };

        if let Err(e) = self.scheduler.mark_completed(&payload).await {
            error!(
                job_id = %job.id,
                account_id = %payload.account_id,
                error = %e,
                "Failed to advance schedule after completed sync"
            );
        } else {
            info!(
                job_id = %job.id,
                account_id = %payload.account_id,
                sync_type = %payload.sync_type,
                "Sync completed"
            );
        }
    }

    async fn on_failed(&self, job: &Job, error: &AppError) -> RetryDecision {
        let classification = classify(&error.to_string());

        let exhausted =
            !classification.should_retry || job.attempts_made >= classification.max_retries;

        if exhausted {
            warn!(
                job_id = %job.id,
                kind = %classification.kind,
                attempts = job.attempts_made,
                "Job is terminal; dead-lettering"
            );
            self.dead_letter(job, error, &classification).await;
            return RetryDecision::DeadLetter;
        }

        let delay = backoff_delay(&classification, job.attempts_made);
        debug!(
            job_id = %job.id,
            kind = %classification.kind,
            attempt = job.attempts_made,
            delay_ms = delay.as_millis() as u64,
            "Retry permitted"
        );
        RetryDecision::Retry { delay }
    }
}

/// Parse the sync payload off a job, when it carries one
fn sync_payload(job: &Job) -> Option<SyncJobPayload> {
    serde_json::from_value(job.payload.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobState;
    use crate::scheduler::SchedulerConfig;
    use crate::storage::memory::{InMemoryAlertSink, InMemoryDeadLetterStore, InMemoryScheduleStore};
    use crate::queue::{QueueConfig, WorkQueue};
    use uuid::Uuid;

    struct NoopProcessor;

    #[async_trait::async_trait]
    impl crate::queue::worker::JobProcessor for NoopProcessor {
        async fn process(&self, _job: &Job) -> crate::errors::AppResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn coordinator() -> (
        Arc<ErrorRecoveryCoordinator>,
        Arc<InMemoryDeadLetterStore>,
        Arc<InMemoryAlertSink>,
    ) {
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let alerts = Arc::new(InMemoryAlertSink::new());
        let scheduler = SyncScheduler::new(
            WorkQueue::new("recovery-test", QueueConfig::default()),
            Arc::new(InMemoryScheduleStore::new()),
            Arc::new(NoopProcessor),
            SchedulerConfig::default(),
        );
        let coordinator = ErrorRecoveryCoordinator::new(
            Arc::clone(&dead_letters) as Arc<dyn DeadLetterStore>,
            Arc::clone(&alerts) as Arc<dyn AlertSink>,
            scheduler,
        );
        (coordinator, dead_letters, alerts)
    }

    fn job_with_attempts(attempts: u32) -> Job {
        Job {
            id: format!("job-{}", Uuid::new_v4()),
            queue_name: "test".to_owned(),
            name: "sync".to_owned(),
            payload: serde_json::json!({"data": "original"}),
            priority: 0,
            attempts_made: attempts,
            max_attempts: 10,
            state: JobState::Active,
            created_at: Utc::now(),
            processed_at: Some(Utc::now()),
            finished_at: None,
            sequence: 0,
        }
    }

    #[tokio::test]
    async fn test_non_retryable_dead_letters_on_first_failure() {
        let (coordinator, dead_letters, _) = coordinator();
        let job = job_with_attempts(1);
        let error = AppError::invalid_input("Invalid request: bad request (400)");

        let decision = coordinator.on_failed(&job, &error).await;

        assert_eq!(decision, RetryDecision::DeadLetter);
        let records = dead_letters.list_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attempts_made, 1);
        assert_eq!(records[0].original_payload, job.payload);
    }

    #[tokio::test]
    async fn test_retryable_failure_gets_backoff_delay() {
        let (coordinator, dead_letters, _) = coordinator();
        let job = job_with_attempts(1);
        let error = AppError::internal("Request timeout after 30000ms");

        let decision = coordinator.on_failed(&job, &error).await;

        match decision {
            RetryDecision::Retry { delay } => {
                // Network policy: base 2s, up to 30% jitter
                let ms = delay.as_millis() as u64;
                assert!((2_000..=2_600).contains(&ms), "unexpected delay {ms}");
            }
            RetryDecision::DeadLetter => panic!("expected retry"),
        }
        assert!(dead_letters.list_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_budget_dead_letters() {
        let (coordinator, dead_letters, _) = coordinator();
        // Network kind allows 5 retries
        let job = job_with_attempts(5);
        let error = AppError::internal("connection reset by peer");

        let decision = coordinator.on_failed(&job, &error).await;

        assert_eq!(decision, RetryDecision::DeadLetter);
        assert_eq!(dead_letters.list_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_intervention_raises_alert() {
        let (coordinator, _, alerts) = coordinator();
        let job = job_with_attempts(2);
        let error = AppError::auth_invalid("invalid_grant: refresh token revoked");

        let decision = coordinator.on_failed(&job, &error).await;

        assert_eq!(decision, RetryDecision::DeadLetter);
        let raised = alerts.raised().await;
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].job_id, job.id);
        assert_eq!(raised[0].attempts_made, 2);
    }

    #[tokio::test]
    async fn test_error_excerpt_is_capped() {
        let (coordinator, dead_letters, _) = coordinator();
        let job = job_with_attempts(1);
        let error = AppError::invalid_input(format!("bad request: {}", "x".repeat(2_000)));

        coordinator.on_failed(&job, &error).await;

        let records = dead_letters.list_records().await.unwrap();
        assert_eq!(records[0].error_excerpt.chars().count(), 500);
    }
}
