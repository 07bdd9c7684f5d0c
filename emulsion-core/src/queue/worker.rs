//! Bounded per-queue worker pools that poll [`JobQueue::claim`] and hand
//! claimed jobs to an application-supplied handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use emulsion_model::{JobId, JobPayload, QueueName};
use tracing::{error, info};

use super::postgres::JobQueue;

/// Outcome of handling one job. `retryable` distinguishes a transient
/// failure (worth another attempt) from a permanent one (dead on arrival).
pub struct JobHandlerError {
    pub message: String,
    pub retryable: bool,
}

impl JobHandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job_id: JobId, payload: JobPayload) -> Result<(), JobHandlerError>;
}

const LEASE_TTL_SECS: i64 = 300;
const POLL_INTERVAL_IDLE: Duration = Duration::from_millis(500);
/// Bounds how long one `handler.handle` call may run before the worker
/// gives up on it and fails the job as transient. Keeps a stuck downstream
/// connection (e.g. the ML service) from pinning a worker slot forever;
/// stays comfortably under `LEASE_TTL_SECS` so the lease never expires
/// first.
const HANDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Spawns `worker_count` independent polling loops against `queue`, all
/// sharing the same handler. Returns immediately; the loops run until the
/// process exits (no graceful drain is modeled — matches the queue's
/// at-least-once delivery contract).
pub fn spawn_worker_pool(
    job_queue: JobQueue,
    queue: QueueName,
    worker_count: u32,
    handler: Arc<dyn JobHandler>,
) {
    for worker_index in 0..worker_count.max(1) {
        let job_queue = job_queue.clone();
        let handler = handler.clone();
        let worker_id = format!("{}-{worker_index}", queue.as_str());

        tokio::spawn(async move {
            info!(worker_id, queue = queue.as_str(), "worker started");
            loop {
                match job_queue
                    .claim(queue, &worker_id, ChronoDuration::seconds(LEASE_TTL_SECS))
                    .await
                {
                    Ok(Some(claimed)) => {
                        let job_id = claimed.id;
                        let outcome = match tokio::time::timeout(HANDLE_TIMEOUT, handler.handle(job_id, claimed.payload)).await
                        {
                            Ok(result) => result,
                            Err(_) => Err(JobHandlerError::transient(format!(
                                "handler timed out after {HANDLE_TIMEOUT:?}"
                            ))),
                        };
                        match outcome {
                            Ok(()) => {
                                if let Err(e) = job_queue.complete(job_id).await {
                                    error!(error = %e, job_id = %job_id, "failed to mark job complete");
                                }
                            }
                            Err(failure) => {
                                if let Err(e) = job_queue
                                    .fail(job_id, failure.retryable, failure.message)
                                    .await
                                {
                                    error!(error = %e, job_id = %job_id, "failed to record job failure");
                                }
                            }
                        }
                    }
                    Ok(None) => tokio::time::sleep(POLL_INTERVAL_IDLE).await,
                    Err(e) => {
                        error!(error = %e, worker_id, "claim failed, backing off");
                        tokio::time::sleep(POLL_INTERVAL_IDLE).await;
                    }
                }
            }
        });
    }
}
