//! Scenario: a well-formed photo upload is fully ingested in one pass —
//! EXIF fields land on the asset, three thumbnails are generated and
//! indexed, the file is committed into `inbox/`, and the terminal status is
//! `complete`.

use std::io::Cursor;
use std::sync::Arc;

use emulsion_core::processor::AssetProcessor;
use emulsion_core::staging::StagingManager;
use emulsion_core::thumbnail::Thumbnailer;
use emulsion_core::{metadata::MetadataExtractor, RepositoryLayout};
use emulsion_model::{
    AssetMetadata, AssetStatus, DuplicateFilenamePolicy, ProcessAssetPayload, RepositoryId,
    StorageStrategy, UserId,
};
use image::{DynamicImage, ImageFormat};

use crate::integration::support::InMemoryAssetIndex;

const EXIFTOOL_OUTPUT: &str = r#"[{
  "Make": "Canon",
  "Model": "Canon EOS 80D",
  "LensModel": "EF-S18-55mm f/3.5-5.6",
  "ExposureTime": "1/500",
  "FNumber": "5.6",
  "ISO": "200",
  "FocalLength": "50.0 mm",
  "DateTimeOriginal": "2024:07:01 10:30:00",
  "ImageWidth": 4000,
  "ImageHeight": 3000,
  "Orientation": 1
}]"#;

#[tokio::test]
async fn happy_photo_full_ingest_completes_with_metadata_and_thumbnails() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RepositoryLayout::new(dir.path());
    layout.ensure_system_dirs().unwrap();

    let exiftool = dir.path().join("stub-exiftool.sh");
    super::support::write_stub_tool(&exiftool, EXIFTOOL_OUTPUT);

    let staging = StagingManager::new(layout.clone());
    let mut jpeg_bytes = Vec::new();
    DynamicImage::new_rgb8(640, 480)
        .write_to(&mut Cursor::new(&mut jpeg_bytes), ImageFormat::Jpeg)
        .unwrap();
    let staged_path = staging.stage(Cursor::new(jpeg_bytes), "vacation.jpg", 0).await.unwrap();

    let index = Arc::new(InMemoryAssetIndex::default());
    let metadata_extractor = Arc::new(MetadataExtractor::new(
        4,
        exiftool.to_string_lossy().into_owned(),
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
        StorageStrategy::Date,
        DuplicateFilenamePolicy::Rename,
    );

    let repository_id = RepositoryId::new();
    let payload = ProcessAssetPayload {
        staged_path: staged_path.to_string_lossy().into_owned(),
        client_hash: "deadbeefcafe".to_string(),
        user_id: UserId::new(),
        repository_id,
        original_filename: "vacation.jpg".to_string(),
        mime: "image/jpeg".to_string(),
        timestamp: chrono::Utc::now(),
    };

    let asset_id = processor.process(&payload, repository_id).await.unwrap();
    let asset = index.snapshot(asset_id);

    assert_eq!(asset.status, AssetStatus::Complete);
    assert!(asset.storage_path.as_deref().unwrap().starts_with("inbox/2024/07/"));
    assert_eq!(
        asset.taken_at.unwrap().to_rfc3339(),
        "2024-07-01T10:30:00+00:00"
    );
    match asset.metadata {
        AssetMetadata::Photo(photo) => {
            assert_eq!(photo.camera_make.as_deref(), Some("Canon"));
            assert_eq!(photo.camera_model.as_deref(), Some("Canon EOS 80D"));
            assert_eq!(photo.iso, Some(200));
        }
        other => panic!("expected photo metadata, got {other:?}"),
    }
    assert_eq!(index.thumbnail_count(asset_id), 3);
}
