//! File/sync-operation persistence contract. Deliberately separate from `AssetIndex`: file records carry
//! no foreign key to an asset row, so the
//! two contracts must stay implementable against independent tables.

use async_trait::async_trait;
use emulsion_model::{FileRecord, RepositoryId, SyncOperation};

use crate::error::Result;

#[async_trait]
pub trait FileIndex: Send + Sync {
    /// Inserts or updates the (repository, relative_path) row. Both the
    /// watcher and the reconciliation scanner call this; the unique
    /// constraint on (repository, relative_path) is what lets the two
    /// converge on the same final row under concurrent writes.
    async fn upsert_file_record(&self, record: &FileRecord) -> Result<()>;

    async fn get_file_record(
        &self,
        repository_id: RepositoryId,
        relative_path: &str,
    ) -> Result<Option<FileRecord>>;

    async fn delete_file_record(&self, repository_id: RepositoryId, relative_path: &str) -> Result<()>;

    /// Deletes every file record for `repository_id` whose `scan_generation`
    /// is strictly less than `current_generation`, returning the count
    /// removed.
    async fn delete_stale_generations(
        &self,
        repository_id: RepositoryId,
        current_generation: i64,
    ) -> Result<u64>;

    async fn count_file_records(&self, repository_id: RepositoryId) -> Result<u64>;

    async fn create_sync_operation(&self, operation: &SyncOperation) -> Result<()>;

    async fn update_sync_operation(&self, operation: &SyncOperation) -> Result<()>;

    async fn list_sync_operations(
        &self,
        repository_id: RepositoryId,
        limit: u32,
    ) -> Result<Vec<SyncOperation>>;

    async fn latest_sync_operation(&self, repository_id: RepositoryId) -> Result<Option<SyncOperation>>;
}
