//! Postgres-backed [`RepositoryStore`]: durable registry of known
//! repositories, independent of the `emulsion.toml` file each repository
//! also carries on disk (the config file is what a repository's owner
//! edits directly; this table is what the server remembers across
//! restarts).
//!
//! Expects a migration equivalent to:
//! ```sql
//! CREATE TABLE repositories (
//!     id UUID PRIMARY KEY,
//!     root TEXT NOT NULL UNIQUE,
//!     config JSONB NOT NULL,
//!     status TEXT NOT NULL,
//!     last_sync_at TIMESTAMPTZ
//! );
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use emulsion_model::{Repository, RepositoryConfigFile, RepositoryId, RepositoryStatus};
use sqlx::{PgPool, Row};

use crate::error::Result;
use crate::repository_manager::RepositoryStore;

#[derive(Clone)]
pub struct PostgresRepositoryStore {
    pool: PgPool,
}

impl PostgresRepositoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepositoryStore for PostgresRepositoryStore {
    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let rows = sqlx::query(r#"SELECT * FROM repositories"#).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_repository).collect()
    }

    async fn create_repository(&self, repository: &Repository) -> Result<()> {
        let config_json = serde_json::to_value(&repository.config)?;
        sqlx::query(
            r#"
            INSERT INTO repositories (id, root, config, status, last_sync_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(repository.id.0)
        .bind(repository.root.to_string_lossy().into_owned())
        .bind(config_json)
        .bind(status_str(repository.status))
        .bind(repository.last_sync_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_repository(&self, repository: &Repository) -> Result<()> {
        let config_json = serde_json::to_value(&repository.config)?;
        sqlx::query(
            r#"
            UPDATE repositories
            SET config = $2, status = $3, last_sync_at = $4
            WHERE id = $1
            "#,
        )
        .bind(repository.id.0)
        .bind(config_json)
        .bind(status_str(repository.status))
        .bind(repository.last_sync_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn status_str(status: RepositoryStatus) -> &'static str {
    match status {
        RepositoryStatus::Active => "active",
        RepositoryStatus::Paused => "paused",
        RepositoryStatus::Error => "error",
    }
}

fn status_from_str(s: &str) -> RepositoryStatus {
    match s {
        "paused" => RepositoryStatus::Paused,
        "error" => RepositoryStatus::Error,
        _ => RepositoryStatus::Active,
    }
}

fn row_to_repository(row: sqlx::postgres::PgRow) -> Result<Repository> {
    let root: String = row.try_get("root")?;
    let config_json: serde_json::Value = row.try_get("config")?;
    let status: String = row.try_get("status")?;
    let config: RepositoryConfigFile = serde_json::from_value(config_json)?;

    Ok(Repository {
        id: RepositoryId(row.try_get("id")?),
        root: PathBuf::from(root),
        config,
        status: status_from_str(&status),
        last_sync_at: row.try_get("last_sync_at")?,
    })
}
