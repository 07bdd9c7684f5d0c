//! Asset Processor: turns one staged file into a committed asset,
//! running the kind-specific subtasks in parallel and folding their
//! outcomes into a single terminal [`AssetStatus`].

pub mod retry;

use std::sync::Arc;

use emulsion_model::{
    subtask, Asset, AssetId, AssetKind, AssetMetadata, AssetStatus, DuplicateFilenamePolicy,
    JobPayload, ProcessAssetPayload, ProcessMlPayload, RepositoryId, StorageStrategy, TaskError,
    Thumbnail,
};
use tracing::{info, warn};

use crate::error::Result;
use crate::fault_tolerant::{collect_errors, SubtaskResult};
use crate::index::AssetIndex;
use crate::layout::RepositoryLayout;
use crate::metadata::MetadataExtractor;
use crate::queue::JobQueue;
use crate::staging::StagingManager;
use crate::thumbnail::{self, Thumbnailer};

pub struct AssetProcessor {
    layout: RepositoryLayout,
    index: Arc<dyn AssetIndex>,
    staging: StagingManager,
    metadata_extractor: Arc<MetadataExtractor>,
    thumbnailer: Arc<Thumbnailer>,
    /// Present only when an ML endpoint is configured. ML work is
    /// enqueued onto `process_ml` rather than run inline here, so it gets
    /// the queue's own durability, retries, and dead-letter handling
    /// (spec's per-named-queue guarantee) instead of being tied to this
    /// job's lifetime.
    ml_queue: Option<JobQueue>,
    storage_strategy: StorageStrategy,
    duplicate_policy: DuplicateFilenamePolicy,
}

impl AssetProcessor {
    pub fn new(
        layout: RepositoryLayout,
        index: Arc<dyn AssetIndex>,
        staging: StagingManager,
        metadata_extractor: Arc<MetadataExtractor>,
        thumbnailer: Arc<Thumbnailer>,
        ml_queue: Option<JobQueue>,
        storage_strategy: StorageStrategy,
        duplicate_policy: DuplicateFilenamePolicy,
    ) -> Self {
        Self {
            layout,
            index,
            staging,
            metadata_extractor,
            thumbnailer,
            ml_queue,
            storage_strategy,
            duplicate_policy,
        }
    }

    /// Processes one `ProcessAssetPayload` end to end: classify, dedupe,
    /// create the provisional asset row, run subtasks, commit or fail the
    /// staged file, and persist the terminal status.
    pub async fn process(&self, payload: &ProcessAssetPayload, repository_id: RepositoryId) -> Result<AssetId> {
        let staged_path = std::path::PathBuf::from(&payload.staged_path);

        if let Some(existing) = self
            .index
            .find_by_content_hash(repository_id, &payload.client_hash)
            .await?
        {
            info!(asset_id = %existing.id, hash = %payload.client_hash, "duplicate staged file, discarding");
            self.staging.fail(&staged_path).await.ok();
            return Ok(existing.id);
        }

        let kind = classify(&payload.mime, &payload.original_filename, &staged_path).await;

        // The staged file can vanish between staging and pickup (eviction,
        // operator error, a concurrent cleanup). That's a fatal file_read
        // error, not a bubbled-up IO error: the asset still needs a row so
        // callers can see why it failed.
        let size_bytes = match tokio::fs::metadata(&staged_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                let asset = Asset::new_processing(
                    repository_id,
                    payload.user_id,
                    kind,
                    payload.mime.clone(),
                    payload.original_filename.clone(),
                    0,
                    payload.client_hash.clone(),
                );
                self.index.create_asset(&asset).await?;
                let status = AssetStatus::from_errors(vec![TaskError::new(subtask::FILE_READ, e.to_string())]);
                self.staging.fail(&staged_path).await.ok();
                self.index.update_status(asset.id, &status).await?;
                return Ok(asset.id);
            }
        };

        let asset = Asset::new_processing(
            repository_id,
            payload.user_id,
            kind,
            payload.mime.clone(),
            payload.original_filename.clone(),
            size_bytes,
            payload.client_hash.clone(),
        );
        self.index.create_asset(&asset).await?;
        let asset_id = asset.id;

        let (results, taken_at) = self.run_subtasks(asset_id, kind, &staged_path, size_bytes).await;
        let errors = collect_errors(results);
        let status = AssetStatus::from_errors(errors);

        self.finalize(asset_id, &staged_path, payload, &status, taken_at).await?;
        Ok(asset_id)
    }

    async fn run_subtasks(
        &self,
        asset_id: AssetId,
        kind: AssetKind,
        staged_path: &std::path::Path,
        size_bytes: u64,
    ) -> (Vec<SubtaskResult>, Option<chrono::DateTime<chrono::Utc>>) {
        match kind {
            AssetKind::Photo => self.run_photo_subtasks(asset_id, staged_path, size_bytes).await,
            AssetKind::Video => self.run_video_subtasks(asset_id, staged_path, size_bytes).await,
            AssetKind::Audio => (self.run_audio_subtasks(asset_id, staged_path, size_bytes).await, None),
            AssetKind::Unknown => (Vec::new(), None),
        }
    }

    /// EXIF extraction and thumbnail/ML processing share no inputs — both
    /// only need the staged file itself — so they run as two concurrent
    /// branches of a fault-tolerant group rather than a sequential chain
    ///.
    async fn run_photo_subtasks(
        &self,
        asset_id: AssetId,
        staged_path: &std::path::Path,
        size_bytes: u64,
    ) -> (Vec<SubtaskResult>, Option<chrono::DateTime<chrono::Utc>>) {
        let metadata_branch = self.run_photo_metadata_branch(asset_id, staged_path, size_bytes);
        let image_branch = self.run_photo_image_branch(asset_id, staged_path);

        let ((mut metadata_results, taken_at), mut image_results) = tokio::join!(metadata_branch, image_branch);
        metadata_results.append(&mut image_results);
        (metadata_results, taken_at)
    }

    async fn run_photo_metadata_branch(
        &self,
        asset_id: AssetId,
        staged_path: &std::path::Path,
        size_bytes: u64,
    ) -> (Vec<SubtaskResult>, Option<chrono::DateTime<chrono::Utc>>) {
        let mut results = Vec::new();
        let taken_at = match self.open_and_extract_metadata(staged_path, AssetKind::Photo, size_bytes).await {
            Ok(outcome) => {
                results.push(ok(subtask::EXTRACT_EXIF));
                if let Err(e) = self.index.update_taken_at(asset_id, outcome.taken_at).await {
                    warn!(error = %e, "failed to persist taken_at");
                }
                if let Err(e) = self.index.update_metadata(asset_id, &outcome.metadata).await {
                    warn!(error = %e, "failed to persist photo metadata");
                }
                if let Err(e) = self.index.update_dimensions(asset_id, outcome.width, outcome.height).await {
                    warn!(error = %e, "failed to persist dimensions");
                }
                outcome.taken_at
            }
            Err(e) => {
                results.push(err(subtask::EXTRACT_EXIF, e.to_string()));
                None
            }
        };
        (results, taken_at)
    }

    async fn run_photo_image_branch(&self, asset_id: AssetId, staged_path: &std::path::Path) -> Vec<SubtaskResult> {
        let mut results = Vec::new();

        let image_bytes = match self.decode_image_bytes(staged_path).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                results.push(err(subtask::RAW_PROCESSING, e.to_string()));
                None
            }
        };

        if let Some(bytes) = image_bytes.as_ref() {
            match self.thumbnailer.generate_photo_thumbnails(bytes) {
                Ok(thumbs) => {
                    results.push(ok(subtask::GENERATE_THUMBNAILS));
                    match self.save_and_index_thumbnails(asset_id, thumbs).await {
                        Ok(()) => results.push(ok(subtask::SAVE_THUMBNAILS)),
                        Err(e) => results.push(err(subtask::SAVE_THUMBNAILS, e.to_string())),
                    }
                }
                Err(e) => results.push(err(subtask::GENERATE_THUMBNAILS, e.to_string())),
            }

            if let Some(queue) = &self.ml_queue {
                let enqueued = queue
                    .enqueue(JobPayload::ProcessMl(ProcessMlPayload {
                        asset_id,
                        image_bytes: bytes.clone(),
                    }))
                    .await;
                if let Err(e) = enqueued {
                    results.push(err(subtask::CLIP_PROCESSING, e.to_string()));
                }
            }
        }

        results
    }

    async fn run_video_subtasks(
        &self,
        asset_id: AssetId,
        staged_path: &std::path::Path,
        size_bytes: u64,
    ) -> (Vec<SubtaskResult>, Option<chrono::DateTime<chrono::Utc>>) {
        let mut results = Vec::new();

        let (duration_secs, taken_at) = match self
            .open_and_extract_metadata(staged_path, AssetKind::Video, size_bytes)
            .await
        {
            Ok(outcome) => {
                results.push(ok(subtask::EXTRACT_METADATA));
                let duration = if let AssetMetadata::Video(ref video) = outcome.metadata {
                    video.duration_secs
                } else {
                    None
                };
                if let Err(e) = self.index.update_duration(asset_id, duration).await {
                    warn!(error = %e, "failed to persist duration");
                }
                if let Err(e) = self.index.update_taken_at(asset_id, outcome.taken_at).await {
                    warn!(error = %e, "failed to persist taken_at");
                }
                if let Err(e) = self.index.update_metadata(asset_id, &outcome.metadata).await {
                    warn!(error = %e, "failed to persist video metadata");
                }
                if let Err(e) = self.index.update_dimensions(asset_id, outcome.width, outcome.height).await {
                    warn!(error = %e, "failed to persist dimensions");
                }
                (duration, outcome.taken_at)
            }
            Err(e) => {
                results.push(err(subtask::EXTRACT_METADATA, e.to_string()));
                (None, None)
            }
        };

        if let Some(duration) = duration_secs {
            let thumbnail_branch = self.run_video_thumbnail_branch(asset_id, staged_path, duration);
            let transcode_branch = self.run_video_transcode_branch(asset_id, staged_path);
            let (mut thumbnail_results, mut transcode_results) = tokio::join!(thumbnail_branch, transcode_branch);
            results.append(&mut thumbnail_results);
            results.append(&mut transcode_results);
        }

        (results, taken_at)
    }

    /// Frame extraction/thumbnailing and the optional web transcode both
    /// only need the staged file and its duration, so they run concurrently
    /// rather than one after the other.
    async fn run_video_thumbnail_branch(
        &self,
        asset_id: AssetId,
        staged_path: &std::path::Path,
        duration: f64,
    ) -> Vec<SubtaskResult> {
        let mut results = Vec::new();
        match self.thumbnailer.extract_video_frame(staged_path, duration).await {
            Ok(frame_bytes) => match self.thumbnailer.generate_photo_thumbnails(&frame_bytes) {
                Ok(thumbs) => {
                    results.push(ok(subtask::GENERATE_THUMBNAILS));
                    match self.save_and_index_thumbnails(asset_id, thumbs).await {
                        Ok(()) => results.push(ok(subtask::SAVE_THUMBNAILS)),
                        Err(e) => results.push(err(subtask::SAVE_THUMBNAILS, e.to_string())),
                    }
                }
                Err(e) => results.push(err(subtask::GENERATE_THUMBNAILS, e.to_string())),
            },
            Err(e) => results.push(err(subtask::GENERATE_THUMBNAILS, e.to_string())),
        }
        results
    }

    async fn run_video_transcode_branch(&self, asset_id: AssetId, staged_path: &std::path::Path) -> Vec<SubtaskResult> {
        let mut results = Vec::new();
        match self
            .thumbnailer
            .transcode_web_copy(staged_path, &asset_id.to_string())
            .await
        {
            Ok(_web_path) => results.push(ok(subtask::GENERATE_WEB_VERSION)),
            Err(e) => {
                // Optional; a failure here is a warning, never fatal.
                warn!(error = %e, "web transcode failed");
                results.push(err(subtask::GENERATE_WEB_VERSION, e.to_string()));
            }
        }
        results
    }

    async fn run_audio_subtasks(
        &self,
        asset_id: AssetId,
        staged_path: &std::path::Path,
        size_bytes: u64,
    ) -> Vec<SubtaskResult> {
        let mut results = Vec::new();
        match self
            .open_and_extract_metadata(staged_path, AssetKind::Audio, size_bytes)
            .await
        {
            Ok(outcome) => {
                results.push(ok(subtask::EXTRACT_METADATA));
                if let Err(e) = self.index.update_metadata(asset_id, &outcome.metadata).await {
                    warn!(error = %e, "failed to persist audio metadata");
                }
            }
            Err(e) => results.push(err(subtask::EXTRACT_METADATA, e.to_string())),
        }
        results
    }

    async fn open_and_extract_metadata(
        &self,
        staged_path: &std::path::Path,
        kind: AssetKind,
        size_bytes: u64,
    ) -> Result<crate::metadata::extractor::ExtractionOutcome> {
        let file = tokio::fs::File::open(staged_path).await?;
        self.metadata_extractor.extract(file, kind, size_bytes).await
    }

    async fn decode_image_bytes(&self, staged_path: &std::path::Path) -> Result<Vec<u8>> {
        let raw = tokio::fs::read(staged_path).await?;
        if thumbnail::is_raw(staged_path) {
            self.thumbnailer.decode_raw(&raw).await
        } else {
            Ok(raw)
        }
    }

    async fn save_and_index_thumbnails(
        &self,
        asset_id: AssetId,
        thumbs: Vec<thumbnail::GeneratedThumbnail>,
    ) -> Result<()> {
        for generated in thumbs {
            let relative_path = self.thumbnailer.save_thumbnail(&asset_id.to_string(), &generated).await?;
            self.index
                .upsert_thumbnail(&Thumbnail {
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

    async fn finalize(
        &self,
        asset_id: AssetId,
        staged_path: &std::path::Path,
        payload: &ProcessAssetPayload,
        status: &AssetStatus,
        taken_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        if matches!(status, AssetStatus::Failed { .. }) {
            self.staging.fail(staged_path).await?;
            self.index.update_status(asset_id, status).await?;
            return Ok(());
        }

        let storage_path = self
            .staging
            .commit(
                staged_path,
                &payload.original_filename,
                Some(&payload.client_hash),
                taken_at,
                self.storage_strategy,
                self.duplicate_policy,
            )
            .await?;

        self.index.update_storage_path(asset_id, &storage_path).await?;
        self.index.update_status(asset_id, status).await?;
        Ok(())
    }
}

fn ok(name: &'static str) -> SubtaskResult {
    SubtaskResult { name, error: None }
}

fn err(name: &'static str, message: String) -> SubtaskResult {
    SubtaskResult {
        name,
        error: Some(emulsion_model::TaskError::new(name, message)),
    }
}

/// Classifies a staged file's asset kind from its declared MIME type,
/// falling back to the filename extension and, if both come back
/// `Unknown`, a magic-number sniff of the staged file's first bytes.
async fn classify(mime: &str, filename: &str, staged_path: &std::path::Path) -> AssetKind {
    let by_mime = AssetKind::from_mime(mime);
    if by_mime != AssetKind::Unknown {
        return by_mime;
    }
    let ext = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let by_ext = AssetKind::from_extension(ext);
    if by_ext != AssetKind::Unknown {
        return by_ext;
    }
    sniff_magic_bytes(staged_path).await
}

/// Best-effort magic-number probe: a missing or unreadable staged file
/// just leaves classification at `Unknown`, same as today — the
/// subsequent file-read check is what turns that into a fatal error.
async fn sniff_magic_bytes(staged_path: &std::path::Path) -> AssetKind {
    use tokio::io::AsyncReadExt;

    let Ok(mut file) = tokio::fs::File::open(staged_path).await else {
        return AssetKind::Unknown;
    };
    let mut buf = [0u8; 64];
    let Ok(n) = file.read(&mut buf).await else {
        return AssetKind::Unknown;
    };
    AssetKind::from_magic_bytes(&buf[..n])
}
