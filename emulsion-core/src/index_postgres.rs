//! Postgres-backed [`AssetIndex`]: the reference implementation of
//! the write surface the processor and retry processor consume. No read/
//! search API beyond what the contract lists — that query layer is out of
//! scope.
//!
//! Expects a migration equivalent to:
//! ```sql
//! CREATE TABLE assets (
//!     id UUID PRIMARY KEY,
//!     repository_id UUID NOT NULL,
//!     owner_id UUID NOT NULL,
//!     kind TEXT NOT NULL,
//!     mime_type TEXT NOT NULL,
//!     original_filename TEXT NOT NULL,
//!     storage_path TEXT,
//!     size_bytes BIGINT NOT NULL,
//!     content_hash TEXT NOT NULL,
//!     width INT,
//!     height INT,
//!     duration_secs DOUBLE PRECISION,
//!     uploaded_at TIMESTAMPTZ NOT NULL,
//!     taken_at TIMESTAMPTZ,
//!     modified_at TIMESTAMPTZ NOT NULL,
//!     rating SMALLINT NOT NULL DEFAULT 0,
//!     liked BOOLEAN NOT NULL DEFAULT FALSE,
//!     description TEXT,
//!     metadata JSONB NOT NULL,
//!     status JSONB NOT NULL,
//!     deleted_at TIMESTAMPTZ,
//!     UNIQUE (repository_id, content_hash)
//! );
//! CREATE TABLE thumbnails (
//!     id UUID PRIMARY KEY,
//!     asset_id UUID NOT NULL REFERENCES assets (id),
//!     size TEXT NOT NULL,
//!     relative_path TEXT NOT NULL,
//!     mime_type TEXT NOT NULL,
//!     UNIQUE (asset_id, size)
//! );
//! CREATE TABLE embeddings (
//!     id UUID PRIMARY KEY,
//!     asset_id UUID NOT NULL REFERENCES assets (id),
//!     embedding_kind TEXT NOT NULL,
//!     model TEXT NOT NULL,
//!     vector JSONB NOT NULL,
//!     is_primary BOOLEAN NOT NULL,
//!     UNIQUE (asset_id, embedding_kind)
//! );
//! CREATE TABLE label_predictions (
//!     asset_id UUID NOT NULL REFERENCES assets (id),
//!     label TEXT NOT NULL,
//!     score REAL NOT NULL,
//!     label_group TEXT,
//!     PRIMARY KEY (asset_id, label)
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use emulsion_model::{
    Asset, AssetId, AssetKind, AssetMetadata, AssetStatus, Embedding, LabelPrediction, RepositoryId,
    Thumbnail,
};
use sqlx::{PgPool, Row};

use crate::error::Result;
use crate::index::AssetIndex;

#[derive(Clone)]
pub struct PostgresAssetIndex {
    pool: PgPool,
}

impl PostgresAssetIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssetIndex for PostgresAssetIndex {
    async fn create_asset(&self, asset: &Asset) -> Result<()> {
        let metadata_json = serde_json::to_value(&asset.metadata)?;
        let status_json = serde_json::to_value(&asset.status)?;

        sqlx::query(
            r#"
            INSERT INTO assets (
                id, repository_id, owner_id, kind, mime_type, original_filename, storage_path,
                size_bytes, content_hash, width, height, duration_secs, uploaded_at, taken_at,
                modified_at, rating, liked, description, metadata, status, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, NULL)
            "#,
        )
        .bind(asset.id.0)
        .bind(asset.repository_id.0)
        .bind(asset.owner_id.0)
        .bind(kind_str(asset.kind))
        .bind(&asset.mime_type)
        .bind(&asset.original_filename)
        .bind(&asset.storage_path)
        .bind(asset.size_bytes as i64)
        .bind(&asset.content_hash)
        .bind(asset.width.map(|w| w as i32))
        .bind(asset.height.map(|h| h as i32))
        .bind(asset.duration_secs)
        .bind(asset.uploaded_at)
        .bind(asset.taken_at)
        .bind(asset.modified_at)
        .bind(asset.rating as i16)
        .bind(asset.liked)
        .bind(&asset.description)
        .bind(metadata_json)
        .bind(status_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_content_hash(&self, repository_id: RepositoryId, content_hash: &str) -> Result<Option<Asset>> {
        let row = sqlx::query(
            r#"SELECT * FROM assets WHERE repository_id = $1 AND content_hash = $2 AND deleted_at IS NULL"#,
        )
        .bind(repository_id.0)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_asset).transpose()
    }

    async fn update_metadata(&self, asset_id: AssetId, metadata: &AssetMetadata) -> Result<()> {
        let metadata_json = serde_json::to_value(metadata)?;
        sqlx::query(r#"UPDATE assets SET metadata = $2, modified_at = NOW() WHERE id = $1"#)
            .bind(asset_id.0)
            .bind(metadata_json)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_dimensions(&self, asset_id: AssetId, width: Option<u32>, height: Option<u32>) -> Result<()> {
        sqlx::query(r#"UPDATE assets SET width = $2, height = $3, modified_at = NOW() WHERE id = $1"#)
            .bind(asset_id.0)
            .bind(width.map(|w| w as i32))
            .bind(height.map(|h| h as i32))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_duration(&self, asset_id: AssetId, duration_secs: Option<f64>) -> Result<()> {
        sqlx::query(r#"UPDATE assets SET duration_secs = $2, modified_at = NOW() WHERE id = $1"#)
            .bind(asset_id.0)
            .bind(duration_secs)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_taken_at(&self, asset_id: AssetId, taken_at: Option<DateTime<Utc>>) -> Result<()> {
        sqlx::query(r#"UPDATE assets SET taken_at = $2, modified_at = NOW() WHERE id = $1"#)
            .bind(asset_id.0)
            .bind(taken_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_storage_path(&self, asset_id: AssetId, storage_path: &str) -> Result<()> {
        sqlx::query(r#"UPDATE assets SET storage_path = $2, modified_at = NOW() WHERE id = $1"#)
            .bind(asset_id.0)
            .bind(storage_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_status(&self, asset_id: AssetId, status: &AssetStatus) -> Result<()> {
        let status_json = serde_json::to_value(status)?;
        sqlx::query(r#"UPDATE assets SET status = $2, modified_at = NOW() WHERE id = $1"#)
            .bind(asset_id.0)
            .bind(status_json)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_thumbnail(&self, thumbnail: &Thumbnail) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO thumbnails (id, asset_id, size, relative_path, mime_type)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (asset_id, size)
            DO UPDATE SET relative_path = EXCLUDED.relative_path, mime_type = EXCLUDED.mime_type
            "#,
        )
        .bind(thumbnail.id.0)
        .bind(thumbnail.asset_id.0)
        .bind(thumbnail.size.as_str())
        .bind(&thumbnail.relative_path)
        .bind(&thumbnail.mime_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()> {
        let vector_json = serde_json::to_value(&embedding.vector)?;
        sqlx::query(
            r#"
            INSERT INTO embeddings (id, asset_id, embedding_kind, model, vector, is_primary)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (asset_id, embedding_kind)
            DO UPDATE SET model = EXCLUDED.model, vector = EXCLUDED.vector, is_primary = EXCLUDED.is_primary
            "#,
        )
        .bind(embedding.id.0)
        .bind(embedding.asset_id.0)
        .bind(&embedding.embedding_kind)
        .bind(&embedding.model)
        .bind(vector_json)
        .bind(embedding.primary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_label_predictions(&self, predictions: &[LabelPrediction]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for prediction in predictions {
            sqlx::query(
                r#"
                INSERT INTO label_predictions (asset_id, label, score, label_group)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (asset_id, label) DO UPDATE SET score = EXCLUDED.score, label_group = EXCLUDED.label_group
                "#,
            )
            .bind(prediction.asset_id.0)
            .bind(&prediction.label)
            .bind(prediction.score)
            .bind(&prediction.group)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn soft_delete(&self, asset_id: AssetId) -> Result<()> {
        sqlx::query(r#"UPDATE assets SET deleted_at = NOW(), modified_at = NOW() WHERE id = $1"#)
            .bind(asset_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, asset_id: AssetId) -> Result<Option<Asset>> {
        let row = sqlx::query(r#"SELECT * FROM assets WHERE id = $1"#)
            .bind(asset_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_asset).transpose()
    }
}

fn kind_str(kind: AssetKind) -> &'static str {
    match kind {
        AssetKind::Photo => "photo",
        AssetKind::Video => "video",
        AssetKind::Audio => "audio",
        AssetKind::Unknown => "unknown",
    }
}

fn kind_from_str(s: &str) -> AssetKind {
    match s {
        "photo" => AssetKind::Photo,
        "video" => AssetKind::Video,
        "audio" => AssetKind::Audio,
        _ => AssetKind::Unknown,
    }
}

fn row_to_asset(row: sqlx::postgres::PgRow) -> Result<Asset> {
    let metadata_json: serde_json::Value = row.try_get("metadata")?;
    let status_json: serde_json::Value = row.try_get("status")?;
    let kind: String = row.try_get("kind")?;
    let width: Option<i32> = row.try_get("width")?;
    let height: Option<i32> = row.try_get("height")?;
    let rating: i16 = row.try_get("rating")?;
    let size_bytes: i64 = row.try_get("size_bytes")?;

    Ok(Asset {
        id: AssetId(row.try_get("id")?),
        repository_id: RepositoryId(row.try_get("repository_id")?),
        owner_id: emulsion_model::UserId(row.try_get("owner_id")?),
        kind: kind_from_str(&kind),
        mime_type: row.try_get("mime_type")?,
        original_filename: row.try_get("original_filename")?,
        storage_path: row.try_get("storage_path")?,
        size_bytes: size_bytes.max(0) as u64,
        content_hash: row.try_get("content_hash")?,
        width: width.map(|w| w.max(0) as u32),
        height: height.map(|h| h.max(0) as u32),
        duration_secs: row.try_get("duration_secs")?,
        uploaded_at: row.try_get("uploaded_at")?,
        taken_at: row.try_get("taken_at")?,
        modified_at: row.try_get("modified_at")?,
        rating: rating.clamp(0, 5) as u8,
        liked: row.try_get("liked")?,
        description: row.try_get("description")?,
        metadata: serde_json::from_value(metadata_json)?,
        status: serde_json::from_value(status_json)?,
        deleted: row.try_get::<Option<DateTime<Utc>>, _>("deleted_at")?.is_some(),
    })
}
