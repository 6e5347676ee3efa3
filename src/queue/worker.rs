// ABOUTME: Worker pool pulling jobs off a queue under a shared pacing limiter
// ABOUTME: Outcome handling is delegated so retry policy lives outside the pool
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

use super::{Job, WorkQueue};
use crate::errors::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Fallback poll interval when no wakeup arrives
const IDLE_POLL_MS: u64 = 100;

/// Processes one job
#[async_trait::async_trait]
pub trait JobProcessor: Send + Sync {
    /// Run the job to completion. An `Err` hands the job to the outcome
    /// handler for a retry-or-dead-letter decision.
    async fn process(&self, job: &Job) -> AppResult<serde_json::Value>;
}

/// What to do with a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue after the delay, original priority preserved
    Retry { delay: Duration },
    /// Stop retrying; the job is terminally failed
    DeadLetter,
}

/// Receives job outcomes synchronously, before the queue state advances
///
/// The handler is the single authority on retries. Its dead-letter side
/// effects (records, alerts) happen before the job is marked failed, so a
/// crash between the two re-runs the handler rather than losing the record.
#[async_trait::async_trait]
pub trait JobOutcomeHandler: Send + Sync {
    /// Called when a job finishes successfully
    async fn on_completed(&self, job: &Job, result: &serde_json::Value);

    /// Called when an attempt fails; the returned decision drives the queue
    async fn on_failed(&self, job: &Job, error: &AppError) -> RetryDecision;
}

/// Pool of workers draining one queue
///
/// Concurrency and pacing come from the queue's configuration. The pacing
/// limiter spaces job starts across the whole pool, not per worker.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the pool's workers
    #[must_use]
    pub fn start(
        queue: Arc<WorkQueue>,
        processor: Arc<dyn JobProcessor>,
        handler: Arc<dyn JobOutcomeHandler>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);

        let config = queue.config();
        let min_interval = if config.rate_limit_per_sec == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(1_000 / u64::from(config.rate_limit_per_sec))
        };
        let pacer = Arc::new(Mutex::new(Instant::now()));

        let handles = (0..config.concurrency.max(1))
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let processor = Arc::clone(&processor);
                let handler = Arc::clone(&handler);
                let pacer = Arc::clone(&pacer);
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    worker_loop(
                        worker_id,
                        queue,
                        processor,
                        handler,
                        pacer,
                        min_interval,
                        shutdown_rx,
                    )
                    .await;
                })
            })
            .collect();

        info!(
            queue = queue.name(),
            concurrency = config.concurrency,
            rate_limit_per_sec = config.rate_limit_per_sec,
            "Worker pool started"
        );

        Self { shutdown, handles }
    }

    /// Signal shutdown and wait for in-flight jobs to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        debug!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<WorkQueue>,
    processor: Arc<dyn JobProcessor>,
    handler: Arc<dyn JobOutcomeHandler>,
    pacer: Arc<Mutex<Instant>>,
    min_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let Some(job) = queue.take_next().await else {
            tokio::select! {
                () = queue.notified() => {}
                () = tokio::time::sleep(Duration::from_millis(IDLE_POLL_MS)) => {}
                _ = shutdown_rx.changed() => {}
            }
            continue;
        };

        pace(&pacer, min_interval).await;

        debug!(
            worker_id,
            job_id = %job.id,
            job_name = %job.name,
            attempt = job.attempts_made,
            "Processing job"
        );

        match processor.process(&job).await {
            Ok(result) => {
                if let Err(e) = queue.complete(&job.id).await {
                    error!(job_id = %job.id, error = %e, "Failed to mark job completed");
                    continue;
                }
                handler.on_completed(&job, &result).await;
            }
            Err(job_error) => {
                let decision = handler.on_failed(&job, &job_error).await;
                let retry_in = match decision {
                    RetryDecision::Retry { delay } => {
                        warn!(
                            job_id = %job.id,
                            attempt = job.attempts_made,
                            delay_ms = delay.as_millis() as u64,
                            error = %job_error,
                            "Job failed; retry scheduled"
                        );
                        Some(delay)
                    }
                    RetryDecision::DeadLetter => {
                        warn!(
                            job_id = %job.id,
                            attempts = job.attempts_made,
                            error = %job_error,
                            "Job dead-lettered"
                        );
                        None
                    }
                };
                if let Err(e) = queue.fail(&job.id, retry_in).await {
                    error!(job_id = %job.id, error = %e, "Failed to record job outcome");
                }
            }
        }
    }
}

/// Reserve the next start slot under the shared pacing limiter, then wait
/// until it arrives
async fn pace(pacer: &Mutex<Instant>, min_interval: Duration) {
    if min_interval.is_zero() {
        return;
    }

    let slot = {
        let mut next_slot = pacer.lock().await;
        let now = Instant::now();
        let slot = (*next_slot).max(now);
        *next_slot = slot + min_interval;
        slot
    };
    tokio::time::sleep_until(slot).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobOptions, QueueConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProcessor {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait::async_trait]
    impl JobProcessor for CountingProcessor {
        async fn process(&self, _job: &Job) -> AppResult<serde_json::Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(AppError::internal("simulated failure"))
            } else {
                Ok(serde_json::json!({ "ok": true }))
            }
        }
    }

    struct ImmediateRetryHandler {
        completed: AtomicU32,
        dead_lettered: AtomicU32,
        max_attempts: u32,
    }

    #[async_trait::async_trait]
    impl JobOutcomeHandler for ImmediateRetryHandler {
        async fn on_completed(&self, _job: &Job, _result: &serde_json::Value) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_failed(&self, job: &Job, _error: &AppError) -> RetryDecision {
            if job.attempts_made >= self.max_attempts {
                self.dead_lettered.fetch_add(1, Ordering::SeqCst);
                RetryDecision::DeadLetter
            } else {
                RetryDecision::Retry {
                    delay: Duration::ZERO,
                }
            }
        }
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            concurrency: 2,
            rate_limit_per_sec: 0,
            default_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_job_retried_then_completed() {
        let queue = WorkQueue::new("worker-test", fast_config());
        let processor = Arc::new(CountingProcessor {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let handler = Arc::new(ImmediateRetryHandler {
            completed: AtomicU32::new(0),
            dead_lettered: AtomicU32::new(0),
            max_attempts: 5,
        });

        let pool = WorkerPool::start(
            Arc::clone(&queue),
            Arc::clone(&processor) as Arc<dyn JobProcessor>,
            Arc::clone(&handler) as Arc<dyn JobOutcomeHandler>,
        );

        queue
            .add("flaky", serde_json::json!({}), JobOptions::default())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), queue.drain())
            .await
            .expect("queue drained");
        pool.shutdown().await;

        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.completed.load(Ordering::SeqCst), 1);
        assert_eq!(handler.dead_lettered.load(Ordering::SeqCst), 0);
        assert_eq!(queue.counts().await.completed, 1);
    }

    #[tokio::test]
    async fn test_exhausted_job_dead_letters_exactly_once() {
        let queue = WorkQueue::new("worker-test", fast_config());
        let processor = Arc::new(CountingProcessor {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let handler = Arc::new(ImmediateRetryHandler {
            completed: AtomicU32::new(0),
            dead_lettered: AtomicU32::new(0),
            max_attempts: 3,
        });

        let pool = WorkerPool::start(
            Arc::clone(&queue),
            Arc::clone(&processor) as Arc<dyn JobProcessor>,
            Arc::clone(&handler) as Arc<dyn JobOutcomeHandler>,
        );

        queue
            .add("doomed", serde_json::json!({}), JobOptions::default())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), queue.drain())
            .await
            .expect("queue drained");
        pool.shutdown().await;

        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.dead_lettered.load(Ordering::SeqCst), 1);
        assert_eq!(queue.counts().await.failed, 1);
    }

    #[tokio::test]
    async fn test_pacing_spaces_job_starts() {
        let pacer = Mutex::new(Instant::now());
        let interval = Duration::from_millis(50);

        let start = Instant::now();
        pace(&pacer, interval).await;
        pace(&pacer, interval).await;
        pace(&pacer, interval).await;

        // Third start waits out two full intervals
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
