//! Scenario: the staged file is deleted after staging but before the worker
//! opens it. Expected: status `failed` with a `file_read` error, and no
//! entry is ever written under `inbox/`.

use std::io::Cursor;
use std::sync::Arc;

use emulsion_core::processor::AssetProcessor;
use emulsion_core::staging::StagingManager;
use emulsion_core::thumbnail::Thumbnailer;
use emulsion_core::{metadata::MetadataExtractor, RepositoryLayout};
use emulsion_model::{subtask, AssetStatus, DuplicateFilenamePolicy, ProcessAssetPayload, RepositoryId, StorageStrategy, UserId};

use crate::integration::support::InMemoryAssetIndex;

#[tokio::test]
async fn deleted_staged_file_fails_asset_with_file_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RepositoryLayout::new(dir.path());
    layout.ensure_system_dirs().unwrap();

    let staging = StagingManager::new(layout.clone());
    let staged_path = staging
        .stage(Cursor::new(b"will be deleted".to_vec()), "corrupt.jpg", 0)
        .await
        .unwrap();

    // Simulate the file vanishing between staging and the worker picking
    // the job up.
    tokio::fs::remove_file(&staged_path).await.unwrap();

    let index = Arc::new(InMemoryAssetIndex::default());
    let metadata_extractor = Arc::new(MetadataExtractor::new(4, "exiftool", "ffprobe"));
    let thumbnailer = Arc::new(Thumbnailer::new(layout.clone(), "dcraw", "ffmpeg"));

    let processor = AssetProcessor::new(
        layout.clone(),
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
        client_hash: "badc0ffee".to_string(),
        user_id: UserId::new(),
        repository_id,
        original_filename: "corrupt.jpg".to_string(),
        mime: "image/jpeg".to_string(),
        timestamp: chrono::Utc::now(),
    };

    let asset_id = processor.process(&payload, repository_id).await.unwrap();
    let asset = index.snapshot(asset_id);

    match &asset.status {
        AssetStatus::Failed { errors } => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].task, subtask::FILE_READ);
        }
        other => panic!("expected failed, got {other:?}"),
    }
    assert!(asset.storage_path.is_none());

    let mut entries = tokio::fs::read_dir(layout.inbox_root()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none(), "no inbox entry should exist");
}
