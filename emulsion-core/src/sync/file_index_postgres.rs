//! Postgres-backed [`FileIndex`]: separate tables from [`crate::index_postgres`]
//! so the sync subsystem's schema can evolve independently of the asset
//! pipeline's.
//!
//! Expects a migration equivalent to:
//! ```sql
//! CREATE TABLE file_records (
//!     repository_id UUID NOT NULL,
//!     relative_path TEXT NOT NULL,
//!     size_bytes BIGINT NOT NULL,
//!     modified_at TIMESTAMPTZ NOT NULL,
//!     content_hash TEXT,
//!     last_scanned_at TIMESTAMPTZ NOT NULL,
//!     scan_generation BIGINT NOT NULL,
//!     PRIMARY KEY (repository_id, relative_path)
//! );
//! CREATE INDEX idx_file_records_stale_generation ON file_records (repository_id, scan_generation);
//!
//! CREATE TABLE sync_operations (
//!     id UUID PRIMARY KEY,
//!     repository_id UUID NOT NULL,
//!     kind TEXT NOT NULL,
//!     scanned BIGINT NOT NULL,
//!     added BIGINT NOT NULL,
//!     updated BIGINT NOT NULL,
//!     removed BIGINT NOT NULL,
//!     started_at TIMESTAMPTZ NOT NULL,
//!     ended_at TIMESTAMPTZ,
//!     status TEXT NOT NULL,
//!     error_message TEXT
//! );
//! CREATE INDEX idx_sync_operations_repository ON sync_operations (repository_id, started_at DESC);
//! ```

use async_trait::async_trait;
use emulsion_model::{FileRecord, RepositoryId, SyncOperation, SyncOperationKind, SyncOperationStatus};
use sqlx::{PgPool, Row};

use crate::error::Result;
use crate::sync::file_index::FileIndex;

#[derive(Clone)]
pub struct PostgresFileIndex {
    pool: PgPool,
}

impl PostgresFileIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileIndex for PostgresFileIndex {
    async fn upsert_file_record(&self, record: &FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_records (
                repository_id, relative_path, size_bytes, modified_at, content_hash,
                last_scanned_at, scan_generation
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (repository_id, relative_path)
            DO UPDATE SET
                size_bytes = EXCLUDED.size_bytes,
                modified_at = EXCLUDED.modified_at,
                content_hash = EXCLUDED.content_hash,
                last_scanned_at = EXCLUDED.last_scanned_at,
                scan_generation = EXCLUDED.scan_generation
            "#,
        )
        .bind(record.repository_id.0)
        .bind(&record.relative_path)
        .bind(record.size_bytes as i64)
        .bind(record.modified_at)
        .bind(&record.content_hash)
        .bind(record.last_scanned_at)
        .bind(record.scan_generation)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_file_record(&self, repository_id: RepositoryId, relative_path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            r#"SELECT * FROM file_records WHERE repository_id = $1 AND relative_path = $2"#,
        )
        .bind(repository_id.0)
        .bind(relative_path)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_file_record).transpose()
    }

    async fn delete_file_record(&self, repository_id: RepositoryId, relative_path: &str) -> Result<()> {
        sqlx::query(r#"DELETE FROM file_records WHERE repository_id = $1 AND relative_path = $2"#)
            .bind(repository_id.0)
            .bind(relative_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_stale_generations(&self, repository_id: RepositoryId, current_generation: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM file_records WHERE repository_id = $1 AND scan_generation < $2"#,
        )
        .bind(repository_id.0)
        .bind(current_generation)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_file_records(&self, repository_id: RepositoryId) -> Result<u64> {
        let count: (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM file_records WHERE repository_id = $1"#)
            .bind(repository_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0.max(0) as u64)
    }

    async fn create_sync_operation(&self, operation: &SyncOperation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_operations (
                id, repository_id, kind, scanned, added, updated, removed,
                started_at, ended_at, status, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(operation.id.0)
        .bind(operation.repository_id.0)
        .bind(kind_str(operation.kind))
        .bind(operation.scanned as i64)
        .bind(operation.added as i64)
        .bind(operation.updated as i64)
        .bind(operation.removed as i64)
        .bind(operation.started_at)
        .bind(operation.ended_at)
        .bind(status_str(operation.status))
        .bind(&operation.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_sync_operation(&self, operation: &SyncOperation) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_operations
            SET scanned = $2, added = $3, updated = $4, removed = $5,
                ended_at = $6, status = $7, error_message = $8
            WHERE id = $1
            "#,
        )
        .bind(operation.id.0)
        .bind(operation.scanned as i64)
        .bind(operation.added as i64)
        .bind(operation.updated as i64)
        .bind(operation.removed as i64)
        .bind(operation.ended_at)
        .bind(status_str(operation.status))
        .bind(&operation.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_sync_operations(&self, repository_id: RepositoryId, limit: u32) -> Result<Vec<SyncOperation>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sync_operations
            WHERE repository_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(repository_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_sync_operation).collect()
    }

    async fn latest_sync_operation(&self, repository_id: RepositoryId) -> Result<Option<SyncOperation>> {
        let row = sqlx::query(
            r#"SELECT * FROM sync_operations WHERE repository_id = $1 ORDER BY started_at DESC LIMIT 1"#,
        )
        .bind(repository_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_sync_operation).transpose()
    }
}

fn kind_str(kind: SyncOperationKind) -> &'static str {
    match kind {
        SyncOperationKind::Startup => "startup",
        SyncOperationKind::Realtime => "realtime",
        SyncOperationKind::Reconciliation => "reconciliation",
    }
}

fn kind_from_str(s: &str) -> SyncOperationKind {
    match s {
        "startup" => SyncOperationKind::Startup,
        "realtime" => SyncOperationKind::Realtime,
        _ => SyncOperationKind::Reconciliation,
    }
}

fn status_str(status: SyncOperationStatus) -> &'static str {
    match status {
        SyncOperationStatus::Running => "running",
        SyncOperationStatus::Completed => "completed",
        SyncOperationStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> SyncOperationStatus {
    match s {
        "completed" => SyncOperationStatus::Completed,
        "failed" => SyncOperationStatus::Failed,
        _ => SyncOperationStatus::Running,
    }
}

fn row_to_file_record(row: sqlx::postgres::PgRow) -> Result<FileRecord> {
    let size_bytes: i64 = row.try_get("size_bytes")?;
    Ok(FileRecord {
        repository_id: RepositoryId(row.try_get("repository_id")?),
        relative_path: row.try_get("relative_path")?,
        size_bytes: size_bytes.max(0) as u64,
        modified_at: row.try_get("modified_at")?,
        content_hash: row.try_get("content_hash")?,
        last_scanned_at: row.try_get("last_scanned_at")?,
        scan_generation: row.try_get("scan_generation")?,
    })
}

fn row_to_sync_operation(row: sqlx::postgres::PgRow) -> Result<SyncOperation> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let scanned: i64 = row.try_get("scanned")?;
    let added: i64 = row.try_get("added")?;
    let updated: i64 = row.try_get("updated")?;
    let removed: i64 = row.try_get("removed")?;

    Ok(SyncOperation {
        id: emulsion_model::SyncOperationId(row.try_get("id")?),
        repository_id: RepositoryId(row.try_get("repository_id")?),
        kind: kind_from_str(&kind),
        scanned: scanned.max(0) as u64,
        added: added.max(0) as u64,
        updated: updated.max(0) as u64,
        removed: removed.max(0) as u64,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        status: status_from_str(&status),
        error_message: row.try_get("error_message")?,
    })
}
