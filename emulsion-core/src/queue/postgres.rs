//! Postgres-backed durable job queue.
//!
//! Expects a migration equivalent to:
//! ```sql
//! CREATE TABLE jobs (
//!     id UUID PRIMARY KEY,
//!     queue TEXT NOT NULL,
//!     payload JSONB NOT NULL,
//!     state TEXT NOT NULL DEFAULT 'ready',
//!     priority INT NOT NULL DEFAULT 0,
//!     attempts INT NOT NULL DEFAULT 0,
//!     available_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     lease_owner TEXT,
//!     lease_expires_at TIMESTAMPTZ,
//!     last_error TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! CREATE INDEX idx_jobs_ready_dequeue ON jobs (queue, available_at) WHERE state = 'ready';
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use emulsion_model::{JobId, JobPayload, QueueName};
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;

use super::record::{ClaimedJob, JobState};

#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
    max_attempts: u32,
}

impl JobQueue {
    pub fn new(pool: PgPool, max_attempts: u32) -> Self {
        Self { pool, max_attempts }
    }

    /// Enqueues `payload` at its queue's default priority. Use
    /// [`Self::enqueue_with_priority`] to override it for one job.
    pub async fn enqueue(&self, payload: JobPayload) -> Result<JobId> {
        let priority = payload.queue_name().default_priority();
        self.enqueue_with_priority(payload, priority).await
    }

    pub async fn enqueue_with_priority(&self, payload: JobPayload, priority: i32) -> Result<JobId> {
        let id = JobId::new();
        let queue = payload.queue_name();
        let payload_json = serde_json::to_value(&payload)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, queue, payload, state, priority, attempts, available_at, created_at, updated_at)
            VALUES ($1, $2, $3, 'ready', $4, 0, NOW(), NOW(), NOW())
            "#,
        )
        .bind(id.0)
        .bind(queue.as_str())
        .bind(payload_json)
        .bind(priority)
        .execute(&self.pool)
        .await?;

        info!(job_id = %id, queue = queue.as_str(), priority, "job enqueued");
        Ok(id)
    }

    /// Claims the oldest ready job on `queue` whose `available_at` has
    /// elapsed, locking the row with `FOR UPDATE SKIP LOCKED` so concurrent
    /// workers never contend on the same candidate.
    pub async fn claim(
        &self,
        queue: QueueName,
        worker_id: &str,
        lease_ttl: ChronoDuration,
    ) -> Result<Option<ClaimedJob>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, payload, priority, attempts
            FROM jobs
            WHERE queue = $1
              AND state = 'ready'
              AND available_at <= NOW()
            ORDER BY priority DESC, available_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(queue.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let id: Uuid = row.try_get("id")?;
        let payload_json: serde_json::Value = row.try_get("payload")?;
        let priority: i32 = row.try_get("priority")?;
        let attempts: i32 = row.try_get("attempts")?;

        let expires_at = Utc::now() + lease_ttl;
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'leased', lease_owner = $2, lease_expires_at = $3, updated_at = NOW()
            WHERE id = $1 AND state = 'ready'
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Ok(None);
        }

        tx.commit().await?;

        let payload: JobPayload = serde_json::from_value(payload_json)?;
        Ok(Some(ClaimedJob {
            id: JobId(id),
            queue,
            payload,
            priority,
            attempts: attempts.max(0) as u32,
            lease_owner: worker_id.to_string(),
            lease_expires_at: expires_at,
        }))
    }

    pub async fn complete(&self, job_id: JobId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed', lease_owner = NULL, lease_expires_at = NULL, updated_at = NOW()
            WHERE id = $1 AND state = 'leased'
            "#,
        )
        .bind(job_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fails a claimed job. `retryable` jobs under the attempt cap are
    /// returned to `ready` with an exponential backoff delay; everything
    /// else moves to a terminal state.
    pub async fn fail(&self, job_id: JobId, retryable: bool, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(r#"SELECT attempts FROM jobs WHERE id = $1 FOR UPDATE"#)
            .bind(job_id.0)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await.ok();
            return Ok(());
        };

        let attempts: i32 = row.try_get("attempts")?;
        let next_attempts = attempts + 1;

        if retryable && (next_attempts as u32) < self.max_attempts {
            let delay = backoff_delay(next_attempts as u32);
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'ready', attempts = $2, lease_owner = NULL, lease_expires_at = NULL,
                    last_error = $3, available_at = NOW() + $4 * INTERVAL '1 millisecond', updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(job_id.0)
            .bind(next_attempts)
            .bind(&error)
            .bind(delay.num_milliseconds())
            .execute(&mut *tx)
            .await?;
            warn!(job_id = %job_id, attempts = next_attempts, "job failed, scheduled retry");
        } else {
            let terminal = if retryable { JobState::DeadLetter } else { JobState::Failed };
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = $2, attempts = $3, lease_owner = NULL, lease_expires_at = NULL,
                    last_error = $4, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(job_id.0)
            .bind(terminal.as_str())
            .bind(next_attempts)
            .bind(&error)
            .execute(&mut *tx)
            .await?;
            warn!(job_id = %job_id, state = terminal.as_str(), attempts = next_attempts, "job exhausted retries");
        }

        tx.commit().await?;
        Ok(())
    }

    /// Resurrects jobs whose lease expired without the worker reporting
    /// back (crash, network partition). Counts as a failed attempt.
    pub async fn reclaim_expired_leases(&self) -> Result<u64> {
        let expired: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM jobs
            WHERE state = 'leased' AND lease_expires_at IS NOT NULL AND lease_expires_at < NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for (id,) in &expired {
            self.fail(JobId(*id), true, "lease expired").await?;
        }
        Ok(expired.len() as u64)
    }

    pub async fn queue_depth(&self, queue: QueueName) -> Result<u64> {
        let count: (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM jobs WHERE queue = $1 AND state = 'ready'"#)
                .bind(queue.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0.max(0) as u64)
    }

    pub async fn state_of(&self, job_id: JobId) -> Result<Option<JobState>> {
        let row: Option<(String,)> = sqlx::query_as(r#"SELECT state FROM jobs WHERE id = $1"#)
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(s,)| JobState::from_str(&s)))
    }
}

const BACKOFF_BASE_MS: i64 = 1_000;
const BACKOFF_MAX_MS: i64 = 5 * 60 * 1_000;

fn backoff_delay(attempt: u32) -> ChronoDuration {
    let exp = attempt.saturating_sub(1).min(20);
    let scaled = (BACKOFF_BASE_MS as f64) * 2f64.powi(exp as i32);
    let capped = scaled.min(BACKOFF_MAX_MS as f64);
    ChronoDuration::milliseconds(capped as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let d1 = backoff_delay(1);
        let d2 = backoff_delay(2);
        let d20 = backoff_delay(20);
        assert!(d2 > d1);
        assert!(d20.num_milliseconds() <= BACKOFF_MAX_MS);
    }
}
