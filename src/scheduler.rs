// ABOUTME: Periodic tick that turns due per-account sync schedules into queue jobs
// ABOUTME: Manual triggers bypass the cadence with elevated priority
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

use crate::constants::queue::{DEFAULT_SCHEDULER_INTERVAL_MINS, MANUAL_SYNC_PRIORITY};
use crate::errors::{AppError, AppResult};
use crate::queue::worker::JobProcessor;
use crate::queue::{Job, JobOptions, JobState, WorkQueue};
use crate::storage::ScheduleStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minutes between ticks
    pub tick_interval_mins: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_mins: DEFAULT_SCHEDULER_INTERVAL_MINS,
        }
    }
}

impl SchedulerConfig {
    /// Create scheduler configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            tick_interval_mins: crate::config::env_parse(
                "SCHEDULER_INTERVAL_MINS",
                DEFAULT_SCHEDULER_INTERVAL_MINS,
            ),
        }
    }
}

/// Kinds of data synchronized from the partner API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Orders,
    Inventory,
    Pricing,
    Reports,
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Orders => "orders",
            Self::Inventory => "inventory",
            Self::Pricing => "pricing",
            Self::Reports => "reports",
        };
        write!(f, "{name}")
    }
}

/// Per-account, per-data-type sync cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncScheduleEntry {
    /// Account the schedule belongs to
    pub account_id: Uuid,
    /// Credential used for the account's API calls
    pub credential_id: Uuid,
    /// Data type this entry covers
    pub sync_type: SyncType,
    /// Minutes between runs; zero disables the entry
    pub interval_minutes: u32,
    /// Whether the entry participates in scheduling at all
    pub enabled: bool,
    /// When the entry last ran
    pub last_run_at: Option<DateTime<Utc>>,
    /// When the entry is next due; `None` means due immediately
    pub next_run_at: Option<DateTime<Utc>>,
}

impl SyncScheduleEntry {
    /// Whether the entry should be enqueued at `now`
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.interval_minutes > 0
            && self.next_run_at.is_none_or(|due| due <= now)
    }
}

/// Payload carried by every sync job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJobPayload {
    /// Account to synchronize
    pub account_id: Uuid,
    /// Credential used for the account's API calls
    pub credential_id: Uuid,
    /// Data type to synchronize
    pub sync_type: SyncType,
    /// Schedule interval; zero for manual runs outside any cadence
    pub interval_minutes: u32,
}

/// Dedup id shared by scheduled and manual enqueues of the same work
#[must_use]
pub fn sync_job_id(account_id: Uuid, sync_type: SyncType) -> String {
    format!("sync:{account_id}:{sync_type}")
}

/// Turns due schedule entries into queue jobs on a periodic tick
///
/// `next_run_at` advances only when a job completes, via `mark_completed`.
/// The dedup id keeps a still-pending entry from being enqueued twice even
/// across ticks.
pub struct SyncScheduler {
    queue: Arc<WorkQueue>,
    schedules: Arc<dyn ScheduleStore>,
    fallback: Arc<dyn JobProcessor>,
    config: SchedulerConfig,
}

impl SyncScheduler {
    /// Create a scheduler
    ///
    /// `fallback` runs manual syncs inline when the queue rejects the enqueue.
    #[must_use]
    pub fn new(
        queue: Arc<WorkQueue>,
        schedules: Arc<dyn ScheduleStore>,
        fallback: Arc<dyn JobProcessor>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            schedules,
            fallback,
            config,
        })
    }

    /// Spawn the periodic tick loop
    #[must_use]
    pub fn start(self: &Arc<Self>) -> SchedulerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let scheduler = Arc::clone(self);
        let tick = Duration::from_secs(scheduler.config.tick_interval_mins * 60);

        let handle = tokio::spawn(async move {
            info!(
                tick_interval_mins = scheduler.config.tick_interval_mins,
                "Sync scheduler started"
            );
            loop {
                tokio::select! {
                    () = tokio::time::sleep(tick) => {}
                    _ = shutdown_rx.changed() => return,
                }
                if let Err(e) = scheduler.run_pending(Utc::now()).await {
                    error!(error = %e, "Scheduler tick failed");
                }
            }
        });

        SchedulerHandle { shutdown, handle }
    }

    /// Enqueue one job per due schedule entry
    ///
    /// # Errors
    ///
    /// Returns an error when the schedule store cannot be read; individual
    /// enqueue failures are logged and skipped so one bad entry does not
    /// starve the rest
    pub async fn run_pending(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let due = self.schedules.due_entries(now).await?;
        let mut enqueued = 0;

        for entry in due {
            if !entry.is_due(now) {
                continue;
            }

            let payload = SyncJobPayload {
                account_id: entry.account_id,
                credential_id: entry.credential_id,
                sync_type: entry.sync_type,
                interval_minutes: entry.interval_minutes,
            };
            let options = JobOptions {
                job_id: Some(sync_job_id(entry.account_id, entry.sync_type)),
                ..JobOptions::default()
            };

            match self.enqueue(payload, options).await {
                Ok(job) => {
                    debug!(
                        account_id = %entry.account_id,
                        sync_type = %entry.sync_type,
                        job_id = %job.id,
                        "Enqueued scheduled sync"
                    );
                    enqueued += 1;
                }
                Err(e) => {
                    error!(
                        account_id = %entry.account_id,
                        sync_type = %entry.sync_type,
                        error = %e,
                        "Failed to enqueue scheduled sync"
                    );
                }
            }
        }

        Ok(enqueued)
    }

    /// Run a sync now, outside the schedule, at elevated priority
    ///
    /// When the queue rejects the enqueue, the sync runs inline in the caller
    /// instead of being dropped.
    ///
    /// # Errors
    ///
    /// Returns an error only when both the enqueue and the inline fallback fail
    pub async fn trigger_manual_sync(
        &self,
        account_id: Uuid,
        credential_id: Uuid,
        sync_type: SyncType,
    ) -> AppResult<ManualSyncOutcome> {
        let payload = SyncJobPayload {
            account_id,
            credential_id,
            sync_type,
            interval_minutes: 0,
        };
        let options = JobOptions {
            priority: MANUAL_SYNC_PRIORITY,
            job_id: Some(sync_job_id(account_id, sync_type)),
            ..JobOptions::default()
        };

        match self.enqueue(payload.clone(), options).await {
            Ok(job) => Ok(ManualSyncOutcome::Enqueued { job_id: job.id }),
            Err(enqueue_error) => {
                warn!(
                    account_id = %account_id,
                    sync_type = %sync_type,
                    error = %enqueue_error,
                    "Queue unavailable; running manual sync inline"
                );
                let job = inline_job(&payload)?;
                let result = self.fallback.process(&job).await?;
                Ok(ManualSyncOutcome::RanInline { result })
            }
        }
    }

    /// Record a completed run and advance the entry's next due time
    ///
    /// # Errors
    ///
    /// Returns an error if the schedule store write fails
    pub async fn mark_completed(&self, payload: &SyncJobPayload) -> AppResult<()> {
        if payload.interval_minutes == 0 {
            return Ok(());
        }

        let now = Utc::now();
        let next_run_at = now + ChronoDuration::minutes(i64::from(payload.interval_minutes));
        self.schedules
            .mark_run(payload.account_id, payload.sync_type, now, next_run_at)
            .await
    }

    async fn enqueue(&self, payload: SyncJobPayload, options: JobOptions) -> AppResult<Job> {
        let payload = serde_json::to_value(&payload)
            .map_err(|e| AppError::internal(format!("Failed to serialize sync payload: {e}")))?;
        self.queue.add("sync", payload, options).await
    }
}

/// Result of a manual sync trigger
#[derive(Debug)]
pub enum ManualSyncOutcome {
    /// The sync was queued normally
    Enqueued { job_id: String },
    /// The queue was unavailable and the sync ran in the caller
    RanInline { result: serde_json::Value },
}

/// Running scheduler loop; dropping the handle leaves the loop running
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the tick loop and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
        debug!("Sync scheduler stopped");
    }
}

/// Synthetic job for inline fallback execution
fn inline_job(payload: &SyncJobPayload) -> AppResult<Job> {
    Ok(Job {
        id: sync_job_id(payload.account_id, payload.sync_type),
        queue_name: "inline".to_owned(),
        name: "sync".to_owned(),
        payload: serde_json::to_value(payload)
            .map_err(|e| AppError::internal(format!("Failed to serialize sync payload: {e}")))?,
        priority: MANUAL_SYNC_PRIORITY,
        attempts_made: 1,
        max_attempts: 1,
        state: JobState::Active,
        created_at: Utc::now(),
        processed_at: Some(Utc::now()),
        finished_at: None,
        sequence: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_type_display_is_lowercase() {
        assert_eq!(SyncType::Orders.to_string(), "orders");
        assert_eq!(SyncType::Inventory.to_string(), "inventory");
        assert_eq!(SyncType::Pricing.to_string(), "pricing");
        assert_eq!(SyncType::Reports.to_string(), "reports");
    }

    #[test]
    fn test_sync_job_id_format() {
        let account = Uuid::nil();
        assert_eq!(
            sync_job_id(account, SyncType::Orders),
            format!("sync:{account}:orders")
        );
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut entry = SyncScheduleEntry {
            account_id: Uuid::new_v4(),
            credential_id: Uuid::new_v4(),
            sync_type: SyncType::Orders,
            interval_minutes: 15,
            enabled: true,
            last_run_at: None,
            next_run_at: None,
        };

        // No next_run_at means due immediately
        assert!(entry.is_due(now));

        entry.next_run_at = Some(now - ChronoDuration::minutes(1));
        assert!(entry.is_due(now));

        entry.next_run_at = Some(now + ChronoDuration::minutes(1));
        assert!(!entry.is_due(now));

        entry.next_run_at = None;
        entry.enabled = false;
        assert!(!entry.is_due(now));

        entry.enabled = true;
        entry.interval_minutes = 0;
        assert!(!entry.is_due(now));
    }
}
