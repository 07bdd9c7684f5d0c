//! Retry Processor: re-runs a named subset of subtasks against an
//! already-ingested asset, without touching the subtasks that weren't
//! listed. Fatal-set subtasks can never be selectively retried — a fresh
//! full ingest is the only way to recover from those.

use std::sync::Arc;

use emulsion_model::{subtask, Asset, AssetId, AssetKind, AssetMetadata, AssetStatus, TaskError};
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::index::AssetIndex;
use crate::layout::RepositoryLayout;
use crate::metadata::MetadataExtractor;
use crate::ml::{apply_ml_outcome, MlBatcherHandle};
use crate::thumbnail::{self, Thumbnailer};

pub struct RetryProcessor {
    layout: RepositoryLayout,
    index: Arc<dyn AssetIndex>,
    metadata_extractor: Arc<MetadataExtractor>,
    thumbnailer: Arc<Thumbnailer>,
    ml_batcher: Option<MlBatcherHandle>,
}

impl RetryProcessor {
    pub fn new(
        layout: RepositoryLayout,
        index: Arc<dyn AssetIndex>,
        metadata_extractor: Arc<MetadataExtractor>,
        thumbnailer: Arc<Thumbnailer>,
        ml_batcher: Option<MlBatcherHandle>,
    ) -> Self {
        Self {
            layout,
            index,
            metadata_extractor,
            thumbnailer,
            ml_batcher,
        }
    }

    /// Runs `tasks` against `asset_id`'s committed file and persists the
    /// recomputed terminal status. Rejects the request outright if any
    /// listed task is in the fatal set.
    pub async fn retry(&self, asset_id: AssetId, tasks: Vec<String>) -> Result<AssetStatus> {
        if tasks.is_empty() {
            return Err(EngineError::InvalidRequest("no subtasks requested".into()));
        }
        if let Some(fatal) = tasks.iter().find(|t| subtask::is_fatal(t)) {
            return Err(EngineError::InvalidRequest(format!(
                "subtask '{fatal}' is in the fatal set and cannot be selectively retried"
            )));
        }

        let asset = self
            .index
            .get(asset_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("asset {asset_id}")))?;

        let storage_path = asset
            .storage_path
            .clone()
            .ok_or_else(|| EngineError::InvalidRequest("asset has no committed file to retry against".into()))?;
        let file_path = self.layout.root().join(&storage_path);
        let size_bytes = tokio::fs::metadata(&file_path).await?.len();

        let mut new_errors = Vec::new();
        for task in &tasks {
            if let Err(e) = self.run_one(&asset, asset_id, &file_path, size_bytes, task).await {
                new_errors.push(TaskError::new(task.clone(), e.to_string()));
            }
        }

        let retained: Vec<TaskError> = asset
            .status
            .errors()
            .iter()
            .filter(|e| !tasks.contains(&e.task))
            .cloned()
            .collect();
        let merged: Vec<TaskError> = retained.into_iter().chain(new_errors).collect();
        let status = AssetStatus::from_errors(merged);

        self.index.update_status(asset_id, &status).await?;
        Ok(status)
    }

    async fn run_one(
        &self,
        asset: &Asset,
        asset_id: AssetId,
        file_path: &std::path::Path,
        size_bytes: u64,
        task: &str,
    ) -> Result<()> {
        match task {
            t if t == subtask::EXTRACT_EXIF || t == subtask::EXTRACT_METADATA => {
                self.retry_extract_metadata(asset, asset_id, file_path, size_bytes).await
            }
            t if t == subtask::RAW_PROCESSING => self.retry_raw_processing(asset, file_path).await,
            t if t == subtask::GENERATE_THUMBNAILS || t == subtask::SAVE_THUMBNAILS => {
                self.retry_thumbnails(asset, asset_id, file_path).await
            }
            t if t == subtask::CLIP_PROCESSING => self.retry_clip_processing(asset, asset_id, file_path).await,
            t if t == subtask::GENERATE_WEB_VERSION || t == subtask::TRANSCODE_VIDEO => {
                self.retry_web_transcode(asset, asset_id, file_path).await
            }
            t if t == subtask::TRANSCODE_AUDIO => Err(EngineError::InvalidRequest(
                "audio transcoding is not supported by this engine".into(),
            )),
            other => Err(EngineError::InvalidRequest(format!("unknown subtask '{other}'"))),
        }
    }

    async fn retry_extract_metadata(
        &self,
        asset: &Asset,
        asset_id: AssetId,
        file_path: &std::path::Path,
        size_bytes: u64,
    ) -> Result<()> {
        let file = tokio::fs::File::open(file_path).await?;
        let outcome = self.metadata_extractor.extract(file, asset.kind, size_bytes).await?;

        if let Err(e) = self.index.update_taken_at(asset_id, outcome.taken_at).await {
            warn!(error = %e, "failed to persist taken_at on retry");
        }
        if let AssetMetadata::Video(ref video) = outcome.metadata {
            if let Err(e) = self.index.update_duration(asset_id, video.duration_secs).await {
                warn!(error = %e, "failed to persist duration on retry");
            }
        }
        self.index.update_metadata(asset_id, &outcome.metadata).await?;
        if let Err(e) = self.index.update_dimensions(asset_id, outcome.width, outcome.height).await {
            warn!(error = %e, "failed to persist dimensions on retry");
        }
        Ok(())
    }

    async fn retry_raw_processing(&self, asset: &Asset, file_path: &std::path::Path) -> Result<()> {
        if asset.kind != AssetKind::Photo {
            return Err(EngineError::InvalidRequest("raw-processing only applies to photos".into()));
        }
        self.decode_image_bytes(file_path).await.map(|_| ())
    }

    async fn retry_thumbnails(&self, asset: &Asset, asset_id: AssetId, file_path: &std::path::Path) -> Result<()> {
        let image_bytes = match asset.kind {
            AssetKind::Photo => self.decode_image_bytes(file_path).await?,
            AssetKind::Video => {
                let duration = asset
                    .duration_secs
                    .ok_or_else(|| EngineError::InvalidRequest("duration unknown, retry extract-metadata first".into()))?;
                self.thumbnailer.extract_video_frame(file_path, duration).await?
            }
            _ => return Err(EngineError::InvalidRequest("thumbnails are not supported for this asset kind".into())),
        };

        let thumbs = self.thumbnailer.generate_photo_thumbnails(&image_bytes)?;
        for generated in thumbs {
            let relative_path = self.thumbnailer.save_thumbnail(&asset_id.to_string(), &generated).await?;
            self.index
                .upsert_thumbnail(&emulsion_model::Thumbnail {
                    id: emulsion_model::ThumbnailId::new(),
                    asset_id,
                    size: generated.size,
                    relative_path,
                    mime_type: "image/jpeg".to_string(),
                })
                .await?;
        }
        Ok(())
    }

    async fn retry_clip_processing(&self, asset: &Asset, asset_id: AssetId, file_path: &std::path::Path) -> Result<()> {
        if asset.kind != AssetKind::Photo {
            return Err(EngineError::InvalidRequest("clip-processing only applies to photos".into()));
        }
        let batcher = self
            .ml_batcher
            .as_ref()
            .ok_or_else(|| EngineError::InvalidRequest("ml batcher is not configured".into()))?;
        let image_bytes = self.decode_image_bytes(file_path).await?;
        let outcome = batcher.submit(asset_id, image_bytes).await?;
        apply_ml_outcome(self.index.as_ref(), outcome).await
    }

    async fn retry_web_transcode(&self, asset: &Asset, asset_id: AssetId, file_path: &std::path::Path) -> Result<()> {
        if asset.kind != AssetKind::Video {
            return Err(EngineError::InvalidRequest("web transcoding only applies to videos".into()));
        }
        self.thumbnailer.transcode_web_copy(file_path, &asset_id.to_string()).await?;
        Ok(())
    }

    async fn decode_image_bytes(&self, file_path: &std::path::Path) -> Result<Vec<u8>> {
        let raw = tokio::fs::read(file_path).await?;
        if thumbnail::is_raw(file_path) {
            self.thumbnailer.decode_raw(&raw).await
        } else {
            Ok(raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_fatal_set_subtasks() {
        let requested = vec![subtask::FILE_READ.to_string()];
        assert!(requested.iter().any(|t| subtask::is_fatal(t)));
    }
}
