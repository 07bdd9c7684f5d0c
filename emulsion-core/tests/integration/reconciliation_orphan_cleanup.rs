//! Scenario: two files have existing file records; one is deleted from
//! disk before reconciliation runs. Expected: the surviving record is
//! stamped with the new scan generation, the deleted one's record is gone,
//! and a completed sync-operation row carries the right counters.

use std::sync::Arc;

use emulsion_core::sync::{ReconciliationScanner, ReconciliationSettings};
use emulsion_core::RepositoryLayout;
use emulsion_core::sync::file_index::FileIndex;
use emulsion_model::{FileRecord, RepositoryId, SyncOperationKind, SyncOperationStatus};

use crate::integration::support::InMemoryFileIndex;

#[tokio::test]
async fn orphaned_record_is_removed_and_survivor_gets_new_generation() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RepositoryLayout::new(dir.path());
    layout.ensure_system_dirs().unwrap();

    let album = dir.path().join("Album");
    tokio::fs::create_dir_all(&album).await.unwrap();
    tokio::fs::write(album.join("a.jpg"), b"surviving file").await.unwrap();
    tokio::fs::write(album.join("b.jpg"), b"about to be deleted").await.unwrap();
    let a_metadata = tokio::fs::metadata(album.join("a.jpg")).await.unwrap();
    let a_modified_at = chrono::DateTime::<chrono::Utc>::from(a_metadata.modified().unwrap());
    let a_size = a_metadata.len();

    tokio::fs::remove_file(album.join("b.jpg")).await.unwrap();

    let repository_id = RepositoryId::new();
    const OLD_GENERATION: i64 = 0;
    let index = Arc::new(InMemoryFileIndex::default());
    index
        .upsert_file_record(&FileRecord {
            repository_id,
            relative_path: "Album/a.jpg".to_string(),
            size_bytes: a_size,
            modified_at: a_modified_at,
            content_hash: None,
            last_scanned_at: chrono::Utc::now(),
            scan_generation: OLD_GENERATION,
        })
        .await
        .unwrap();
    index
        .upsert_file_record(&FileRecord {
            repository_id,
            relative_path: "Album/b.jpg".to_string(),
            size_bytes: 20,
            modified_at: chrono::Utc::now(),
            content_hash: None,
            last_scanned_at: chrono::Utc::now(),
            scan_generation: OLD_GENERATION,
        })
        .await
        .unwrap();

    let scanner = ReconciliationScanner::new(index.clone(), ReconciliationSettings::default());
    let operation = scanner
        .run(repository_id, &layout, SyncOperationKind::Reconciliation)
        .await
        .unwrap();

    assert_eq!(operation.status, SyncOperationStatus::Completed);
    assert_eq!(operation.kind, SyncOperationKind::Reconciliation);
    assert_eq!(operation.scanned, 1);
    assert_eq!(operation.removed, 1);

    let survivor = index
        .get_file_record(repository_id, "Album/a.jpg")
        .await
        .unwrap()
        .expect("surviving record should still exist");
    assert!(survivor.scan_generation > OLD_GENERATION);

    assert!(index
        .get_file_record(repository_id, "Album/b.jpg")
        .await
        .unwrap()
        .is_none());
}
