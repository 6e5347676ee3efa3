// ABOUTME: End-to-end tests wiring the full engine with in-memory collaborators
// ABOUTME: Covers scheduled syncs, dedup, manual triggers, and dead-letter flow
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

mod common;

use chrono::Utc;
use sellersync::config::EngineConfig;
use sellersync::engine::{EngineStores, SyncEngine};
use sellersync::errors::{AppError, AppResult};
use sellersync::queue::worker::JobProcessor;
use sellersync::queue::Job;
use sellersync::scheduler::{ManualSyncOutcome, SyncJobPayload, SyncScheduleEntry, SyncType};
use sellersync::storage::memory::{
    Base64Codec, InMemoryAlertSink, InMemoryCredentialStore, InMemoryDeadLetterStore,
    InMemoryScheduleStore,
};
use sellersync::storage::{
    AlertSink, CredentialStore, DeadLetterStore, ScheduleStore, SecretCodec,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

struct RecordingProcessor {
    processed: Mutex<Vec<SyncJobPayload>>,
    fail_with: Option<String>,
}

impl RecordingProcessor {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            processed: Mutex::new(Vec::new()),
            fail_with: None,
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            processed: Mutex::new(Vec::new()),
            fail_with: Some(message.to_owned()),
        })
    }

    async fn processed(&self) -> Vec<SyncJobPayload> {
        self.processed.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl JobProcessor for RecordingProcessor {
    async fn process(&self, job: &Job) -> AppResult<serde_json::Value> {
        let payload: SyncJobPayload =
            serde_json::from_value(job.payload.clone()).expect("sync payload");
        self.processed.lock().await.push(payload);

        match &self.fail_with {
            Some(message) => Err(AppError::internal(message.clone())),
            None => Ok(serde_json::json!({ "synced": true })),
        }
    }
}

struct Fixture {
    schedules: Arc<InMemoryScheduleStore>,
    dead_letters: Arc<InMemoryDeadLetterStore>,
    alerts: Arc<InMemoryAlertSink>,
    engine: SyncEngine,
}

async fn open_engine(processor: Arc<dyn JobProcessor>) -> Fixture {
    let schedules = Arc::new(InMemoryScheduleStore::new());
    let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
    let alerts = Arc::new(InMemoryAlertSink::new());

    let stores = EngineStores {
        credentials: Arc::new(InMemoryCredentialStore::new()) as Arc<dyn CredentialStore>,
        schedules: Arc::clone(&schedules) as Arc<dyn ScheduleStore>,
        dead_letters: Arc::clone(&dead_letters) as Arc<dyn DeadLetterStore>,
        alerts: Arc::clone(&alerts) as Arc<dyn AlertSink>,
        secrets: Arc::new(Base64Codec::new()) as Arc<dyn SecretCodec>,
    };

    let engine = SyncEngine::open(EngineConfig::default(), stores, processor)
        .await
        .expect("engine open");

    Fixture {
        schedules,
        dead_letters,
        alerts,
        engine,
    }
}

fn due_entry(sync_type: SyncType) -> SyncScheduleEntry {
    SyncScheduleEntry {
        account_id: Uuid::new_v4(),
        credential_id: Uuid::new_v4(),
        sync_type,
        interval_minutes: 15,
        enabled: true,
        last_run_at: None,
        next_run_at: None,
    }
}

async fn drain(engine: &SyncEngine) {
    tokio::time::timeout(Duration::from_secs(5), engine.queue().drain())
        .await
        .expect("queue drained");
}

#[tokio::test]
async fn test_scheduled_sync_runs_and_advances_schedule() {
    let processor = RecordingProcessor::succeeding();
    let fixture = open_engine(Arc::clone(&processor) as Arc<dyn JobProcessor>).await;
    let entry = due_entry(SyncType::Orders);
    fixture.schedules.upsert_entry(&entry).await.unwrap();

    let now = Utc::now();
    let enqueued = fixture.engine.scheduler().run_pending(now).await.unwrap();
    assert_eq!(enqueued, 1);

    drain(&fixture.engine).await;
    // Completion handling runs just after the queue empties
    tokio::time::sleep(Duration::from_millis(100)).await;

    let processed = processor.processed().await;
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].account_id, entry.account_id);
    assert_eq!(processed[0].sync_type, SyncType::Orders);

    let updated = fixture
        .schedules
        .entry(entry.account_id, entry.sync_type)
        .await
        .expect("entry exists");
    assert!(updated.last_run_at.is_some());
    let next = updated.next_run_at.expect("next run scheduled");
    assert!(next > now + chrono::Duration::minutes(14));

    // The entry is no longer due, so the next tick enqueues nothing
    let enqueued = fixture
        .engine
        .scheduler()
        .run_pending(Utc::now())
        .await
        .unwrap();
    assert_eq!(enqueued, 0);

    fixture.engine.close().await;
}

#[tokio::test]
async fn test_double_tick_enqueues_once_per_entry() {
    let processor = RecordingProcessor::succeeding();
    let fixture = open_engine(Arc::clone(&processor) as Arc<dyn JobProcessor>).await;
    let entry = due_entry(SyncType::Inventory);
    fixture.schedules.upsert_entry(&entry).await.unwrap();

    let now = Utc::now();
    // Two ticks before the job completes; the dedup id collapses them
    fixture.engine.scheduler().run_pending(now).await.unwrap();
    fixture.engine.scheduler().run_pending(now).await.unwrap();

    drain(&fixture.engine).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(processor.processed().await.len(), 1);

    fixture.engine.close().await;
}

#[tokio::test]
async fn test_manual_sync_enqueues_with_elevated_priority() {
    let processor = RecordingProcessor::succeeding();
    let fixture = open_engine(Arc::clone(&processor) as Arc<dyn JobProcessor>).await;

    let account_id = Uuid::new_v4();
    let outcome = fixture
        .engine
        .scheduler()
        .trigger_manual_sync(account_id, Uuid::new_v4(), SyncType::Reports)
        .await
        .unwrap();

    match outcome {
        ManualSyncOutcome::Enqueued { job_id } => {
            assert_eq!(job_id, format!("sync:{account_id}:reports"));
        }
        ManualSyncOutcome::RanInline { .. } => panic!("queue was available"),
    }

    drain(&fixture.engine).await;

    let processed = processor.processed().await;
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].account_id, account_id);
    // Manual runs carry no cadence
    assert_eq!(processed[0].interval_minutes, 0);

    fixture.engine.close().await;
}

#[tokio::test]
async fn test_validation_failure_dead_letters_without_retry() {
    let processor = RecordingProcessor::failing("Invalid request: bad request (400)");
    let fixture = open_engine(Arc::clone(&processor) as Arc<dyn JobProcessor>).await;
    let entry = due_entry(SyncType::Pricing);
    fixture.schedules.upsert_entry(&entry).await.unwrap();

    fixture
        .engine
        .scheduler()
        .run_pending(Utc::now())
        .await
        .unwrap();

    drain(&fixture.engine).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Exactly one attempt, exactly one record, no alert for validation errors
    assert_eq!(processor.processed().await.len(), 1);
    let records = fixture.dead_letters.list_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempts_made, 1);
    assert!(!records[0].requires_manual_intervention);
    assert!(fixture.alerts.raised().await.is_empty());

    // The failed run never advances the schedule
    let updated = fixture
        .schedules
        .entry(entry.account_id, entry.sync_type)
        .await
        .expect("entry exists");
    assert!(updated.next_run_at.is_none());

    fixture.engine.close().await;
}

#[tokio::test]
async fn test_permanent_failure_raises_alert() {
    // Authentication retries use a 60s base delay, too slow for an
    // integration test; the permanent kind exercises the same alert path
    // without any retry wait. The auth budget itself is unit-tested in the
    // recovery module.
    let processor = RecordingProcessor::failing("unrecoverable: account closed");
    let fixture = open_engine(Arc::clone(&processor) as Arc<dyn JobProcessor>).await;
    let entry = due_entry(SyncType::Orders);
    fixture.schedules.upsert_entry(&entry).await.unwrap();

    fixture
        .engine
        .scheduler()
        .run_pending(Utc::now())
        .await
        .unwrap();

    drain(&fixture.engine).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Permanent errors dead-letter immediately and page an operator
    assert_eq!(processor.processed().await.len(), 1);
    let records = fixture.dead_letters.list_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].requires_manual_intervention);

    let alerts = fixture.alerts.raised().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].account_id, Some(entry.account_id));

    fixture.engine.close().await;
}
