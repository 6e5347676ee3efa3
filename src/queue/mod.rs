// ABOUTME: At-least-once job queue with priority, delay, dedup, and state bookkeeping
// ABOUTME: Producers enqueue; the worker pool in worker.rs drives the state machine
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

/// Worker pool pulling and processing jobs
pub mod worker;

use crate::constants::queue::{
    DEFAULT_CONCURRENCY, DEFAULT_JOB_ATTEMPTS, DEFAULT_RATE_LIMIT_PER_SEC,
};
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

/// How many terminal jobs are retained for introspection
const TERMINAL_HISTORY_LIMIT: usize = 1_000;

/// Work queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Workers pulling jobs concurrently
    pub concurrency: usize,
    /// Jobs per second across the whole pool
    pub rate_limit_per_sec: u32,
    /// Attempt budget recorded on jobs that specify none. The recovery
    /// coordinator is the authority on retries; this is a producer hint.
    pub default_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            rate_limit_per_sec: DEFAULT_RATE_LIMIT_PER_SEC,
            default_attempts: DEFAULT_JOB_ATTEMPTS,
        }
    }
}

impl QueueConfig {
    /// Create queue configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            concurrency: crate::config::env_parse("QUEUE_CONCURRENCY", DEFAULT_CONCURRENCY),
            rate_limit_per_sec: crate::config::env_parse(
                "QUEUE_RATE_LIMIT_PER_SEC",
                DEFAULT_RATE_LIMIT_PER_SEC,
            ),
            default_attempts: crate::config::env_parse(
                "QUEUE_DEFAULT_ATTEMPTS",
                DEFAULT_JOB_ATTEMPTS,
            ),
        }
    }
}

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Eligible to be picked up
    Waiting,
    /// Being processed by a worker
    Active,
    /// Finished successfully; terminal
    Completed,
    /// Terminal failure (dead-lettered)
    Failed,
    /// Waiting out a retry delay
    Delayed,
}

/// A unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier; doubles as the dedup key when supplied by the producer
    pub id: String,
    /// Queue the job belongs to
    pub queue_name: String,
    /// Job name, names the kind of work
    pub name: String,
    /// Opaque payload handed to the processor
    pub payload: serde_json::Value,
    /// Higher runs first; retries keep the original priority
    pub priority: i32,
    /// Attempts made so far, incremented when a worker picks the job up
    pub attempts_made: u32,
    /// Producer-supplied attempt budget; a hint, not the retry authority
    pub max_attempts: u32,
    /// Current lifecycle state
    pub state: JobState,
    /// When the job was enqueued
    pub created_at: DateTime<Utc>,
    /// When a worker last picked the job up
    pub processed_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// FIFO tiebreaker within equal priority
    #[serde(skip)]
    pub(crate) sequence: u64,
}

/// Options accepted when enqueueing a job
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Higher runs first; defaults to 0
    pub priority: i32,
    /// Initial delay before the job becomes eligible
    pub delay: Option<Duration>,
    /// Idempotency key; a pending job with the same id is returned instead of
    /// enqueueing a duplicate
    pub job_id: Option<String>,
    /// Producer attempt-budget hint
    pub attempts: Option<u32>,
}

/// Per-state job counts for introspection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

struct QueueInner {
    waiting: Vec<Job>,
    delayed: Vec<(Instant, Job)>,
    active: HashMap<String, Job>,
    completed: Vec<Job>,
    failed: Vec<Job>,
    next_sequence: u64,
}

/// In-process work queue with at-least-once delivery
///
/// Within one queue, jobs run in priority order, FIFO within equal priority.
/// There is no cross-queue ordering guarantee. Cancellation is best-effort
/// and pre-start only; an active job cannot be interrupted mid-flight.
pub struct WorkQueue {
    name: String,
    config: QueueConfig,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl WorkQueue {
    /// Create a named queue
    #[must_use]
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            inner: Mutex::new(QueueInner {
                waiting: Vec::new(),
                delayed: Vec::new(),
                active: HashMap::new(),
                completed: Vec::new(),
                failed: Vec::new(),
                next_sequence: 0,
            }),
            notify: Notify::new(),
        })
    }

    /// Queue name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue configuration
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue a job
    ///
    /// When `options.job_id` matches a pending (waiting, delayed, or active)
    /// job, that job is returned unchanged instead of enqueueing a duplicate.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented
    pub async fn add(
        &self,
        name: impl Into<String>,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> AppResult<Job> {
        let mut inner = self.inner.lock().await;

        let id = options
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if options.job_id.is_some() {
            if let Some(existing) = Self::find_pending(&inner, &id) {
                return Ok(existing);
            }
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        let delay = options.delay.unwrap_or(Duration::ZERO);
        let state = if delay.is_zero() {
            JobState::Waiting
        } else {
            JobState::Delayed
        };

        let job = Job {
            id,
            queue_name: self.name.clone(),
            name: name.into(),
            payload,
            priority: options.priority,
            attempts_made: 0,
            max_attempts: options.attempts.unwrap_or(self.config.default_attempts),
            state,
            created_at: Utc::now(),
            processed_at: None,
            finished_at: None,
            sequence,
        };

        if delay.is_zero() {
            inner.waiting.push(job.clone());
        } else {
            inner.delayed.push((Instant::now() + delay, job.clone()));
        }
        drop(inner);

        self.notify.notify_waiters();
        Ok(job)
    }

    /// Remove a job that has not started yet. Returns false when the job is
    /// active, terminal, or unknown; an in-flight job cannot be cancelled.
    pub async fn remove(&self, job_id: &str) -> bool {
        let mut inner = self.inner.lock().await;

        if let Some(pos) = inner.waiting.iter().position(|j| j.id == job_id) {
            inner.waiting.remove(pos);
            return true;
        }
        if let Some(pos) = inner.delayed.iter().position(|(_, j)| j.id == job_id) {
            inner.delayed.remove(pos);
            return true;
        }
        false
    }

    /// Per-state counts
    pub async fn counts(&self) -> JobCounts {
        let inner = self.inner.lock().await;
        JobCounts {
            waiting: inner.waiting.len(),
            active: inner.active.len(),
            completed: inner.completed.len(),
            failed: inner.failed.len(),
            delayed: inner.delayed.len(),
        }
    }

    /// Retained terminal failures, newest last
    pub async fn failed_jobs(&self) -> Vec<Job> {
        self.inner.lock().await.failed.clone()
    }

    /// Wait until no pending or active work remains. Intended for tests and
    /// drain-on-shutdown; callers bound it with a timeout.
    pub async fn drain(&self) {
        loop {
            let counts = self.counts().await;
            if counts.waiting == 0 && counts.delayed == 0 && counts.active == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Pick the next eligible job: highest priority, FIFO within equal
    /// priority. Marks it active and increments its attempt counter.
    pub(crate) async fn take_next(&self) -> Option<Job> {
        let mut inner = self.inner.lock().await;

        // Promote delayed jobs whose retry delay has elapsed
        let now = Instant::now();
        let mut idx = 0;
        while idx < inner.delayed.len() {
            if inner.delayed[idx].0 <= now {
                let (_, mut job) = inner.delayed.remove(idx);
                job.state = JobState::Waiting;
                inner.waiting.push(job);
            } else {
                idx += 1;
            }
        }

        let best = inner
            .waiting
            .iter()
            .enumerate()
            .max_by_key(|(_, j)| (j.priority, std::cmp::Reverse(j.sequence)))
            .map(|(i, _)| i)?;

        let mut job = inner.waiting.remove(best);
        job.state = JobState::Active;
        job.attempts_made += 1;
        job.processed_at = Some(Utc::now());
        inner.active.insert(job.id.clone(), job.clone());

        Some(job)
    }

    /// Mark an active job completed
    pub(crate) async fn complete(&self, job_id: &str) -> AppResult<Job> {
        let mut inner = self.inner.lock().await;
        let mut job = inner
            .active
            .remove(job_id)
            .ok_or_else(|| AppError::not_found(format!("active job {job_id}")))?;

        job.state = JobState::Completed;
        job.finished_at = Some(Utc::now());
        inner.completed.push(job.clone());
        Self::trim_history(&mut inner.completed);
        Ok(job)
    }

    /// Fail an active job: schedule a retry when a delay is given (original
    /// priority preserved), otherwise mark it terminally failed
    pub(crate) async fn fail(&self, job_id: &str, retry_in: Option<Duration>) -> AppResult<Job> {
        let mut inner = self.inner.lock().await;
        let mut job = inner
            .active
            .remove(job_id)
            .ok_or_else(|| AppError::not_found(format!("active job {job_id}")))?;

        if let Some(delay) = retry_in {
            job.state = JobState::Delayed;
            let scheduled = job.clone();
            inner.delayed.push((Instant::now() + delay, scheduled));
            drop(inner);
            self.notify.notify_waiters();
        } else {
            job.state = JobState::Failed;
            job.finished_at = Some(Utc::now());
            inner.failed.push(job.clone());
            Self::trim_history(&mut inner.failed);
        }

        Ok(job)
    }

    /// Wait for a producer to signal new work
    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }

    fn find_pending(inner: &QueueInner, job_id: &str) -> Option<Job> {
        inner
            .waiting
            .iter()
            .find(|j| j.id == job_id)
            .or_else(|| inner.delayed.iter().map(|(_, j)| j).find(|j| j.id == job_id))
            .or_else(|| inner.active.get(job_id))
            .cloned()
    }

    fn trim_history(history: &mut Vec<Job>) {
        if history.len() > TERMINAL_HISTORY_LIMIT {
            let excess = history.len() - TERMINAL_HISTORY_LIMIT;
            history.drain(0..excess);
        }
    }
}
