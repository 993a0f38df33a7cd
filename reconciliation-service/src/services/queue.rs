//! Persistent job queue for batch processing.
//!
//! Jobs are serialized onto a Redis list and consumed by a small pool
//! of worker loops with at-least-once delivery: a failed or timed-out
//! attempt is re-enqueued with exponential backoff until the attempt
//! budget is spent. Re-execution of the same batch is safe because the
//! worker resets the batch before processing. When Redis is absent or
//! an enqueue fails, the dispatcher falls back to executing the job
//! in-process; the batch still completes, just without retries.

use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::services::metrics::record_error;
use crate::services::worker::BatchWorker;

pub const BATCH_JOB_NAME: &str = "reconciliation-batch-processing";

/// Payload persisted in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    #[serde(rename = "batchId")]
    pub batch_id: Uuid,
    #[serde(rename = "filePath")]
    pub file_path: PathBuf,
    #[serde(default)]
    pub attempt: u32,
}

impl BatchJob {
    pub fn new(batch_id: Uuid, file_path: PathBuf) -> Self {
        Self {
            batch_id,
            file_path,
            attempt: 0,
        }
    }
}

fn queue_key() -> String {
    format!("reconciliation:queue:{BATCH_JOB_NAME}")
}

/// Blocking-pop timeout. Short enough that consumer loops notice
/// shutdown promptly, long enough to avoid hammering Redis.
const POP_TIMEOUT_SECONDS: u64 = 5;

const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct RedisJobQueue {
    manager: ConnectionManager,
}

impl RedisJobQueue {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    pub async fn enqueue(&self, job: &BatchJob) -> Result<(), AppError> {
        let payload = serde_json::to_string(job)
            .map_err(|e| AppError::QueueError(anyhow::anyhow!("Unserializable job: {}", e)))?;

        let mut conn = self.manager.clone();
        redis::cmd("LPUSH")
            .arg(queue_key())
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::QueueError(anyhow::anyhow!("Failed to enqueue job: {}", e)))?;

        tracing::info!(batch_id = %job.batch_id, attempt = job.attempt, "Batch job enqueued");
        Ok(())
    }

    /// Spawn `config.concurrency` consumer loops. Each loop pops one
    /// job at a time and runs it under the configured lock duration;
    /// exceeding it counts as a failed attempt and re-delivers.
    pub fn spawn_consumers(&self, worker: Arc<BatchWorker>, config: WorkerConfig) {
        for consumer_id in 0..config.concurrency.max(1) {
            let queue = self.clone();
            let worker = worker.clone();
            let config = config.clone();
            tokio::spawn(async move {
                tracing::info!(consumer_id, job = BATCH_JOB_NAME, "Queue consumer started");
                queue.consume_loop(worker, config).await;
            });
        }
    }

    async fn consume_loop(self, worker: Arc<BatchWorker>, config: WorkerConfig) {
        loop {
            let popped = self.pop_one().await;
            let raw = match popped {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Queue pop failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let job: BatchJob = match serde_json::from_str(&raw) {
                Ok(job) => job,
                Err(e) => {
                    record_error("queue_payload");
                    tracing::error!(error = %e, payload = %raw, "Dropping undecodable job payload");
                    continue;
                }
            };

            self.run_job(&worker, &config, job).await;
        }
    }

    async fn pop_one(&self) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.manager.clone();
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(queue_key())
            .arg(POP_TIMEOUT_SECONDS)
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn run_job(&self, worker: &BatchWorker, config: &WorkerConfig, job: BatchJob) {
        let lock = Duration::from_secs(config.lock_seconds);
        tracing::info!(
            batch_id = %job.batch_id,
            attempt = job.attempt,
            "Processing batch job"
        );

        let outcome = tokio::time::timeout(lock, worker.process(job.batch_id, &job.file_path)).await;

        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("job exceeded lock duration of {}s", config.lock_seconds),
        };

        let next_attempt = job.attempt + 1;
        if next_attempt >= config.max_attempts {
            record_error("job_exhausted");
            tracing::error!(
                batch_id = %job.batch_id,
                attempts = next_attempt,
                error = %error,
                "Batch job failed permanently"
            );
            return;
        }

        // Exponential backoff from 1s, doubling per attempt.
        let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(job.attempt);
        tracing::warn!(
            batch_id = %job.batch_id,
            attempt = next_attempt,
            delay_secs = delay.as_secs(),
            error = %error,
            "Batch job failed, scheduling retry"
        );

        let queue = self.clone();
        let retry = BatchJob {
            attempt: next_attempt,
            ..job
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.enqueue(&retry).await {
                record_error("queue_retry");
                tracing::error!(batch_id = %retry.batch_id, error = %e, "Failed to re-enqueue job");
            }
        });
    }
}

/// Upload-path entry point. Routes jobs onto the persistent queue when
/// one is configured and falls back to direct in-process execution
/// otherwise; callers never branch on queue availability.
pub struct JobDispatcher {
    queue: Option<RedisJobQueue>,
    worker: Arc<BatchWorker>,
}

impl JobDispatcher {
    pub fn new(queue: Option<RedisJobQueue>, worker: Arc<BatchWorker>) -> Self {
        Self { queue, worker }
    }

    pub async fn dispatch(&self, batch_id: Uuid, file_path: PathBuf) -> Result<(), AppError> {
        let job = BatchJob::new(batch_id, file_path);

        if let Some(queue) = &self.queue {
            match queue.enqueue(&job).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    record_error("queue_enqueue");
                    tracing::warn!(
                        batch_id = %batch_id,
                        error = %e,
                        "Queue unavailable, falling back to in-process execution"
                    );
                }
            }
        }

        let worker = self.worker.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.process(job.batch_id, &job.file_path).await {
                tracing::error!(batch_id = %job.batch_id, error = %e, "In-process batch job failed");
            }
        });
        Ok(())
    }
}
