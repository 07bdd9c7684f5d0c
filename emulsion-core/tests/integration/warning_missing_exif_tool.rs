//! Scenario: `exiftool` isn't installed. Metadata extraction fails, but the
//! rest of the pipeline (thumbnails) still runs, so the asset lands in
//! `warning` rather than `failed`.

use std::io::Cursor;
use std::sync::Arc;

use emulsion_core::processor::AssetProcessor;
use emulsion_core::staging::StagingManager;
use emulsion_core::thumbnail::Thumbnailer;
use emulsion_core::{metadata::MetadataExtractor, RepositoryLayout};
use emulsion_model::{subtask, AssetStatus, DuplicateFilenamePolicy, ProcessAssetPayload, RepositoryId, StorageStrategy, UserId};
use image::{DynamicImage, ImageFormat};

use crate::integration::support::InMemoryAssetIndex;

#[tokio::test]
async fn missing_exif_tool_yields_warning_not_failure() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RepositoryLayout::new(dir.path());
    layout.ensure_system_dirs().unwrap();

    let staging = StagingManager::new(layout.clone());
    let mut jpeg_bytes = Vec::new();
    DynamicImage::new_rgb8(640, 480)
        .write_to(&mut Cursor::new(&mut jpeg_bytes), ImageFormat::Jpeg)
        .unwrap();
    let staged_path = staging.stage(Cursor::new(jpeg_bytes), "photo.jpg", 0).await.unwrap();

    let index = Arc::new(InMemoryAssetIndex::default());
    // Points at a binary that cannot possibly exist on the test machine.
    let metadata_extractor = Arc::new(MetadataExtractor::new(
        4,
        "/nonexistent/emulsion-test-bin/exiftool",
        "ffprobe",
    ));
    let thumbnailer = Arc::new(Thumbnailer::new(layout.clone(), "dcraw", "ffmpeg"));

    let processor = AssetProcessor::new(
        layout,
        index.clone(),
        staging,
        metadata_extractor,
        thumbnailer,
        None,
        StorageStrategy::Flat,
        DuplicateFilenamePolicy::Rename,
    );

    let repository_id = RepositoryId::new();
    let payload = ProcessAssetPayload {
        staged_path: staged_path.to_string_lossy().into_owned(),
        client_hash: "abc123".to_string(),
        user_id: UserId::new(),
        repository_id,
        original_filename: "photo.jpg".to_string(),
        mime: "image/jpeg".to_string(),
        timestamp: chrono::Utc::now(),
    };

    let asset_id = processor.process(&payload, repository_id).await.unwrap();
    let asset = index.snapshot(asset_id);

    match &asset.status {
        AssetStatus::Warning { errors } => {
            assert!(errors.iter().any(|e| e.task == subtask::EXTRACT_EXIF));
        }
        other => panic!("expected warning, got {other:?}"),
    }
    assert!(asset.storage_path.is_some(), "thumbnails succeeding should still commit the file");
    assert_eq!(index.thumbnail_count(asset_id), 3);
}
