//! Reconciliation Scanner: full directory walk with batched diff
//! against the database and generation-based orphan deletion. Runs on
//! repository registration, on a periodic timer, and on manual trigger
//!. The safety net for whatever the watcher misses under event-rate
//! spikes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use emulsion_model::{FileRecord, RepositoryId, SyncOperation, SyncOperationKind};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{EngineError, Result};
use crate::layout::RepositoryLayout;
use crate::sync::file_index::FileIndex;
use crate::sync::watcher::should_ignore;
use crate::sync::{current_generation, hash_file};

#[derive(Clone, Copy, Debug)]
pub struct ReconciliationSettings {
    pub batch_size: usize,
    pub parallelism: usize,
    pub hash_files: bool,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            parallelism: 4,
            hash_files: true,
        }
    }
}

pub struct ReconciliationScanner {
    index: Arc<dyn FileIndex>,
    settings: ReconciliationSettings,
}

impl ReconciliationScanner {
    pub fn new(index: Arc<dyn FileIndex>, settings: ReconciliationSettings) -> Self {
        Self { index, settings }
    }

    /// Runs one full pass over `layout.root()`, recording a `SyncOperation`
    /// row regardless of outcome. `kind` distinguishes a repository's
    /// initial startup scan from a scheduled/manual reconciliation in that
    /// row's history — the walk itself is identical either way.
    pub async fn run(
        &self,
        repository_id: RepositoryId,
        layout: &RepositoryLayout,
        kind: SyncOperationKind,
    ) -> Result<SyncOperation> {
        let mut operation = SyncOperation::start(repository_id, kind);
        self.index.create_sync_operation(&operation).await?;

        match self.run_inner(repository_id, layout, &mut operation).await {
            Ok(()) => {
                operation.finish_ok();
                info!(
                    repository_id = %repository_id,
                    scanned = operation.scanned,
                    added = operation.added,
                    updated = operation.updated,
                    removed = operation.removed,
                    "reconciliation complete"
                );
            }
            Err(e) => {
                operation.finish_err(e.to_string());
                warn!(repository_id = %repository_id, error = %e, "reconciliation failed");
            }
        }

        self.index.update_sync_operation(&operation).await?;
        Ok(operation)
    }

    async fn run_inner(
        &self,
        repository_id: RepositoryId,
        layout: &RepositoryLayout,
        operation: &mut SyncOperation,
    ) -> Result<()> {
        let generation = current_generation();
        let paths = walk_paths(layout);

        let semaphore = Arc::new(Semaphore::new(self.settings.parallelism.max(1)));
        let batch_size = self.settings.batch_size.max(1);
        let mut tasks = Vec::new();
        for batch in paths.chunks(batch_size).map(<[PathBuf]>::to_vec) {
            let index = self.index.clone();
            let layout = layout.clone();
            let semaphore = semaphore.clone();
            let hash_files = self.settings.hash_files;
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                process_batch(&index, &layout, repository_id, &batch, generation, hash_files).await
            }));
        }

        let mut totals = BatchTotals::default();
        for task in tasks {
            let batch_result = task.await.map_err(|e| EngineError::Internal(e.to_string()))??;
            totals.merge(batch_result);
        }

        operation.scanned = totals.scanned;
        operation.added = totals.added;
        operation.updated = totals.updated;
        operation.removed = self.index.delete_stale_generations(repository_id, generation).await?;
        Ok(())
    }
}

#[derive(Default)]
struct BatchTotals {
    scanned: u64,
    added: u64,
    updated: u64,
}

impl BatchTotals {
    fn merge(&mut self, other: BatchTotals) {
        self.scanned += other.scanned;
        self.added += other.added;
        self.updated += other.updated;
    }
}

/// Depth-first walk of the repository, skipping protected subtrees and
/// ignored filename patterns. Sharing [`should_ignore`] with
/// the watcher keeps the two paths to the same index in agreement about
/// what counts as user-owned content.
fn walk_paths(layout: &RepositoryLayout) -> Vec<PathBuf> {
    WalkDir::new(layout.root())
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !should_ignore(entry.path(), layout))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .collect()
}

/// Diffs one batch of on-disk paths against their file records: not present → add; present with a later modification time or
/// differing size → update; otherwise just bump the generation stamp.
async fn process_batch(
    index: &Arc<dyn FileIndex>,
    layout: &RepositoryLayout,
    repository_id: RepositoryId,
    batch: &[PathBuf],
    generation: i64,
    hash_files: bool,
) -> Result<BatchTotals> {
    let mut totals = BatchTotals::default();
    for path in batch {
        let Some(relative) = relative_path(layout, path) else {
            continue;
        };
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            // Disappeared mid-walk; the next pass's orphan check will catch it.
            Err(_) => continue,
        };
        let modified_at = metadata.modified().map(chrono::DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
        let size_bytes = metadata.len();

        let existing = index.get_file_record(repository_id, &relative).await?;
        totals.scanned += 1;

        match existing {
            None => {
                let content_hash = if hash_files { hash_file(path).await.ok() } else { None };
                index
                    .upsert_file_record(&FileRecord {
                        repository_id,
                        relative_path: relative,
                        size_bytes,
                        modified_at,
                        content_hash,
                        last_scanned_at: Utc::now(),
                        scan_generation: generation,
                    })
                    .await?;
                totals.added += 1;
            }
            Some(record) if record.modified_at < modified_at || record.size_bytes != size_bytes => {
                let content_hash = if hash_files { hash_file(path).await.ok() } else { record.content_hash };
                index
                    .upsert_file_record(&FileRecord {
                        repository_id,
                        relative_path: relative,
                        size_bytes,
                        modified_at,
                        content_hash,
                        last_scanned_at: Utc::now(),
                        scan_generation: generation,
                    })
                    .await?;
                totals.updated += 1;
            }
            Some(mut record) => {
                record.scan_generation = generation;
                record.last_scanned_at = Utc::now();
                index.upsert_file_record(&record).await?;
            }
        }
    }
    Ok(totals)
}

fn relative_path(layout: &RepositoryLayout, path: &Path) -> Option<String> {
    layout.relativize(path).map(|p| p.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_skips_protected_and_hidden_paths() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepositoryLayout::new(dir.path());
        layout.ensure_system_dirs().unwrap();

        std::fs::write(layout.inbox_root().join("already-committed.jpg"), b"x").unwrap();
        let vacation = dir.path().join("Vacation");
        std::fs::create_dir_all(&vacation).unwrap();
        std::fs::write(vacation.join("img.jpg"), b"x").unwrap();
        std::fs::write(vacation.join(".DS_Store"), b"x").unwrap();

        let found = walk_paths(&layout);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0], vacation.join("img.jpg"));
    }
}
