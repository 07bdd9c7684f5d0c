//! In-memory doubles for [`AssetIndex`] and [`FileIndex`], following the
//! `InMemoryStore` pattern already used for `RepositoryStore` in
//! `repository_manager.rs`'s own unit tests. Keeping the suite off a real
//! Postgres instance is a deliberate departure from the teacher's other
//! integration tests, which mostly run against `#[sqlx::test]` pools.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use emulsion_core::index::AssetIndex;
use emulsion_core::sync::file_index::FileIndex;
use emulsion_core::Result;
use emulsion_model::{
    Asset, AssetId, AssetMetadata, AssetStatus, Embedding, FileRecord, LabelPrediction,
    RepositoryId, SyncOperation, Thumbnail,
};

#[derive(Default)]
pub struct InMemoryAssetIndex {
    assets: Mutex<HashMap<AssetId, Asset>>,
    thumbnails: Mutex<Vec<Thumbnail>>,
    embeddings: Mutex<Vec<Embedding>>,
    labels: Mutex<Vec<LabelPrediction>>,
}

impl InMemoryAssetIndex {
    pub fn snapshot(&self, asset_id: AssetId) -> Asset {
        self.assets.lock().unwrap().get(&asset_id).cloned().expect("asset exists")
    }

    pub fn thumbnail_count(&self, asset_id: AssetId) -> usize {
        self.thumbnails.lock().unwrap().iter().filter(|t| t.asset_id == asset_id).count()
    }
}

#[async_trait]
impl AssetIndex for InMemoryAssetIndex {
    async fn create_asset(&self, asset: &Asset) -> Result<()> {
        self.assets.lock().unwrap().insert(asset.id, asset.clone());
        Ok(())
    }

    async fn find_by_content_hash(
        &self,
        repository_id: RepositoryId,
        content_hash: &str,
    ) -> Result<Option<Asset>> {
        Ok(self
            .assets
            .lock()
            .unwrap()
            .values()
            .find(|a| a.repository_id == repository_id && a.content_hash == content_hash)
            .cloned())
    }

    async fn update_metadata(&self, asset_id: AssetId, metadata: &AssetMetadata) -> Result<()> {
        if let Some(asset) = self.assets.lock().unwrap().get_mut(&asset_id) {
            asset.metadata = metadata.clone();
        }
        Ok(())
    }

    async fn update_dimensions(&self, asset_id: AssetId, width: Option<u32>, height: Option<u32>) -> Result<()> {
        if let Some(asset) = self.assets.lock().unwrap().get_mut(&asset_id) {
            asset.width = width;
            asset.height = height;
        }
        Ok(())
    }

    async fn update_duration(&self, asset_id: AssetId, duration_secs: Option<f64>) -> Result<()> {
        if let Some(asset) = self.assets.lock().unwrap().get_mut(&asset_id) {
            asset.duration_secs = duration_secs;
        }
        Ok(())
    }

    async fn update_taken_at(&self, asset_id: AssetId, taken_at: Option<DateTime<Utc>>) -> Result<()> {
        if let Some(asset) = self.assets.lock().unwrap().get_mut(&asset_id) {
            asset.taken_at = taken_at;
        }
        Ok(())
    }

    async fn update_storage_path(&self, asset_id: AssetId, storage_path: &str) -> Result<()> {
        if let Some(asset) = self.assets.lock().unwrap().get_mut(&asset_id) {
            asset.storage_path = Some(storage_path.to_string());
        }
        Ok(())
    }

    async fn update_status(&self, asset_id: AssetId, status: &AssetStatus) -> Result<()> {
        if let Some(asset) = self.assets.lock().unwrap().get_mut(&asset_id) {
            asset.status = status.clone();
        }
        Ok(())
    }

    async fn upsert_thumbnail(&self, thumbnail: &Thumbnail) -> Result<()> {
        let mut thumbnails = self.thumbnails.lock().unwrap();
        if let Some(existing) = thumbnails
            .iter_mut()
            .find(|t| t.asset_id == thumbnail.asset_id && t.size == thumbnail.size)
        {
            *existing = thumbnail.clone();
        } else {
            thumbnails.push(thumbnail.clone());
        }
        Ok(())
    }

    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()> {
        self.embeddings.lock().unwrap().push(embedding.clone());
        Ok(())
    }

    async fn store_label_predictions(&self, predictions: &[LabelPrediction]) -> Result<()> {
        self.labels.lock().unwrap().extend_from_slice(predictions);
        Ok(())
    }

    async fn soft_delete(&self, asset_id: AssetId) -> Result<()> {
        if let Some(asset) = self.assets.lock().unwrap().get_mut(&asset_id) {
            asset.deleted = true;
        }
        Ok(())
    }

    async fn get(&self, asset_id: AssetId) -> Result<Option<Asset>> {
        Ok(self.assets.lock().unwrap().get(&asset_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryFileIndex {
    records: Mutex<HashMap<(RepositoryId, String), FileRecord>>,
    operations: Mutex<Vec<SyncOperation>>,
}

#[async_trait]
impl FileIndex for InMemoryFileIndex {
    async fn upsert_file_record(&self, record: &FileRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert((record.repository_id, record.relative_path.clone()), record.clone());
        Ok(())
    }

    async fn get_file_record(
        &self,
        repository_id: RepositoryId,
        relative_path: &str,
    ) -> Result<Option<FileRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(repository_id, relative_path.to_string()))
            .cloned())
    }

    async fn delete_file_record(&self, repository_id: RepositoryId, relative_path: &str) -> Result<()> {
        self.records.lock().unwrap().remove(&(repository_id, relative_path.to_string()));
        Ok(())
    }

    async fn delete_stale_generations(&self, repository_id: RepositoryId, current_generation: i64) -> Result<u64> {
        let mut records = self.records.lock().unwrap();
        let stale: Vec<_> = records
            .iter()
            .filter(|(key, record)| key.0 == repository_id && record.scan_generation < current_generation)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            records.remove(key);
        }
        Ok(stale.len() as u64)
    }

    async fn count_file_records(&self, repository_id: RepositoryId) -> Result<u64> {
        Ok(self.records.lock().unwrap().keys().filter(|k| k.0 == repository_id).count() as u64)
    }

    async fn create_sync_operation(&self, operation: &SyncOperation) -> Result<()> {
        self.operations.lock().unwrap().push(operation.clone());
        Ok(())
    }

    async fn update_sync_operation(&self, operation: &SyncOperation) -> Result<()> {
        let mut operations = self.operations.lock().unwrap();
        if let Some(existing) = operations.iter_mut().find(|o| o.id == operation.id) {
            *existing = operation.clone();
        }
        Ok(())
    }

    async fn list_sync_operations(&self, repository_id: RepositoryId, limit: u32) -> Result<Vec<SyncOperation>> {
        Ok(self
            .operations
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.repository_id == repository_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn latest_sync_operation(&self, repository_id: RepositoryId) -> Result<Option<SyncOperation>> {
        Ok(self
            .operations
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.repository_id == repository_id)
            .max_by_key(|o| o.started_at)
            .cloned())
    }
}

/// Writes a tiny stand-in executable at `path` that ignores its input and
/// prints `stdout` verbatim, for standing in as `exiftool`/`ffprobe` in
/// scenarios that need deterministic tool output regardless of what's
/// actually installed on the machine running the suite.
#[cfg(unix)]
pub fn write_stub_tool(path: &std::path::Path, stdout: &str) {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let mut file = std::fs::File::create(path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "cat > /dev/null").unwrap();
    writeln!(file, "cat <<'EOF'\n{stdout}\nEOF").unwrap();
    drop(file);

    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}
