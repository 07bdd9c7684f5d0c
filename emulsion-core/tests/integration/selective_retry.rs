//! Scenario: an asset sitting in `warning` with two outstanding subtask
//! errors gets retried one subtask at a time; each successful retry narrows
//! the remaining error set, and clearing the last one transitions the
//! asset all the way to `complete`.

use std::io::Cursor;
use std::sync::Arc;

use emulsion_core::processor::retry::RetryProcessor;
use emulsion_core::thumbnail::Thumbnailer;
use emulsion_core::{metadata::MetadataExtractor, ml::MlBatcher, ml::MlClient, RepositoryLayout};
use emulsion_model::{subtask, Asset, AssetKind, AssetStatus, RepositoryId, TaskError, UserId};
use image::{DynamicImage, ImageFormat};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::integration::support::InMemoryAssetIndex;

/// A minimal one-shot ML server: replies to every NDJSON request with a
/// fixed embedding and no labels, echoing the request's correlation id.
async fn spawn_mock_ml_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: serde_json::Value = serde_json::from_str(&line).unwrap();
            let correlation_id = request["correlation_id"].clone();
            let response = serde_json::json!({
                "correlation_id": correlation_id,
                "embedding": [0.1_f32, 0.2, 0.3],
                "labels": [],
            });
            let mut bytes = serde_json::to_vec(&response).unwrap();
            bytes.push(b'\n');
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    addr
}

#[tokio::test]
async fn selective_retry_narrows_errors_then_completes() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RepositoryLayout::new(dir.path());
    layout.ensure_system_dirs().unwrap();

    tokio::fs::create_dir_all(layout.inbox_root()).await.unwrap();
    let mut jpeg_bytes = Vec::new();
    DynamicImage::new_rgb8(320, 240)
        .write_to(&mut Cursor::new(&mut jpeg_bytes), ImageFormat::Jpeg)
        .unwrap();
    tokio::fs::write(layout.inbox_root().join("photo.jpg"), &jpeg_bytes).await.unwrap();

    let index = Arc::new(InMemoryAssetIndex::default());
    let repository_id = RepositoryId::new();
    let mut asset = Asset::new_processing(
        repository_id,
        UserId::new(),
        AssetKind::Photo,
        "image/jpeg",
        "photo.jpg",
        jpeg_bytes.len() as u64,
        "somehash",
    );
    asset.storage_path = Some("inbox/photo.jpg".to_string());
    asset.status = AssetStatus::Warning {
        errors: vec![
            TaskError::new(subtask::GENERATE_THUMBNAILS, "disk full"),
            TaskError::new(subtask::CLIP_PROCESSING, "ml unreachable"),
        ],
    };
    index.create_asset(&asset).await.unwrap();

    let addr = spawn_mock_ml_server().await;
    let client = MlClient::connect(addr).await.unwrap();
    let ml_batcher = Some(MlBatcher::new(client, 8, std::time::Duration::from_millis(50)).spawn());

    let metadata_extractor = Arc::new(MetadataExtractor::new(4, "exiftool", "ffprobe"));
    let thumbnailer = Arc::new(Thumbnailer::new(layout.clone(), "dcraw", "ffmpeg"));
    let retry_processor = RetryProcessor::new(
        layout,
        index.clone(),
        metadata_extractor,
        thumbnailer,
        ml_batcher,
    );

    let status = retry_processor
        .retry(asset.id, vec![subtask::GENERATE_THUMBNAILS.to_string()])
        .await
        .unwrap();
    match status {
        AssetStatus::Warning { errors } => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].task, subtask::CLIP_PROCESSING);
        }
        other => panic!("expected warning with one remaining error, got {other:?}"),
    }
    assert_eq!(index.thumbnail_count(asset.id), 3);

    let status = retry_processor
        .retry(asset.id, vec![subtask::CLIP_PROCESSING.to_string()])
        .await
        .unwrap();
    assert_eq!(status, AssetStatus::Complete);
}
