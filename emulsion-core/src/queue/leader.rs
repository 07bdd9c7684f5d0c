//! Leader election for the singular parts of sync scheduling.

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::info;

/// Advisory lock key for the reconciliation-scheduling leader. An arbitrary
/// fixed constant is fine: Postgres advisory locks are keyed per-database,
/// not per-table, so this just needs to not collide with another subsystem.
const RECONCILIATION_LEADER_KEY: i64 = 0x656d756c_73696f6e; // "emulsion" truncated to i64

/// Session-scoped advisory lock: `pg_try_advisory_lock` is tied to the
/// connection that takes it, so the held connection must be pinned for as
/// long as this process considers itself leader, never returned to the pool.
pub struct LeaderElection {
    pool: PgPool,
    conn: Option<PoolConnection<Postgres>>,
}

impl LeaderElection {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, conn: None }
    }

    /// Attempts to become leader by taking a dedicated connection out of
    /// the pool and holding the advisory lock on it. Safe to call
    /// repeatedly while already leader.
    pub async fn try_acquire(&mut self) -> crate::error::Result<bool> {
        if self.conn.is_some() {
            return Ok(true);
        }

        let mut conn = self.pool.acquire().await?;
        let row: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(RECONCILIATION_LEADER_KEY)
            .fetch_one(&mut *conn)
            .await?;

        if row.0 {
            info!("acquired reconciliation leader lock");
            self.conn = Some(conn);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn is_leader(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn release(&mut self) -> crate::error::Result<()> {
        if let Some(mut conn) = self.conn.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(RECONCILIATION_LEADER_KEY)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}
