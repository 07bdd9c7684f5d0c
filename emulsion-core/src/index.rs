//! Asset Index contract: the write surface the processor, retry
//! processor, and sync manager use to persist derived state. No query/read
//! API is specified here — only the mutations this engine itself performs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use emulsion_model::{
    Asset, AssetId, AssetMetadata, AssetStatus, Embedding, LabelPrediction, RepositoryId,
    Thumbnail,
};

use crate::error::Result;

#[async_trait]
pub trait AssetIndex: Send + Sync {
    async fn create_asset(&self, asset: &Asset) -> Result<()>;

    async fn find_by_content_hash(
        &self,
        repository_id: RepositoryId,
        content_hash: &str,
    ) -> Result<Option<Asset>>;

    async fn update_metadata(&self, asset_id: AssetId, metadata: &AssetMetadata) -> Result<()>;

    async fn update_dimensions(
        &self,
        asset_id: AssetId,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<()>;

    async fn update_duration(&self, asset_id: AssetId, duration_secs: Option<f64>) -> Result<()>;

    async fn update_taken_at(&self, asset_id: AssetId, taken_at: Option<DateTime<Utc>>) -> Result<()>;

    async fn update_storage_path(&self, asset_id: AssetId, storage_path: &str) -> Result<()>;

    async fn update_status(&self, asset_id: AssetId, status: &AssetStatus) -> Result<()>;

    async fn upsert_thumbnail(&self, thumbnail: &Thumbnail) -> Result<()>;

    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()>;

    async fn store_label_predictions(&self, predictions: &[LabelPrediction]) -> Result<()>;

    async fn soft_delete(&self, asset_id: AssetId) -> Result<()>;

    async fn get(&self, asset_id: AssetId) -> Result<Option<Asset>>;
}
