//! File Watcher: per-repository real-time filesystem monitoring,
//! debounced, dispatching straight to [`FileIndex`] upserts/deletes. Built
//! on the same notify + notify-debouncer-full pairing used elsewhere in
//! this codebase for filesystem monitoring, trimmed to the subset this
//! engine needs (no network-filesystem poll fallback).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use emulsion_model::{FileRecord, RepositoryId};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, DebouncedEvent, Debouncer, NoCache};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::error::{EngineError, Result};
use crate::layout::RepositoryLayout;
use crate::sync::file_index::FileIndex;
use crate::sync::{current_generation, hash_file};

/// Active watch for one repository. Dropping it stops the underlying OS
/// watch.
struct RepositoryWatch {
    _debouncer: Debouncer<RecommendedWatcher, NoCache>,
}

/// Dispatches OS filesystem events to [`FileIndex`] mutations, one debounced
/// watcher per repository. Hashing runs behind a
/// bounded semaphore shared across every watched repository so a burst of
/// writes in one repository can't starve I/O for the others.
pub struct FileWatcher {
    index: Arc<dyn FileIndex>,
    hash_semaphore: Arc<Semaphore>,
    watches: DashMap<RepositoryId, RepositoryWatch>,
}

impl FileWatcher {
    pub fn new(index: Arc<dyn FileIndex>, hash_concurrency: usize) -> Self {
        Self {
            index,
            hash_semaphore: Arc::new(Semaphore::new(hash_concurrency.max(1))),
            watches: DashMap::new(),
        }
    }

    /// Starts watching `layout.root()` recursively, replacing any existing
    /// watch for the same repository.
    pub fn watch(&self, repository_id: RepositoryId, layout: RepositoryLayout, debounce: Duration) -> Result<()> {
        let index = self.index.clone();
        let semaphore = self.hash_semaphore.clone();
        let layout_cb = layout.clone();

        let mut debouncer = new_debouncer(
            debounce,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in &events {
                        dispatch_event(event, repository_id, &layout_cb, &index, &semaphore);
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "file watcher debouncer error");
                    }
                }
            },
        )
        .map_err(|e| EngineError::Internal(format!("failed to create debouncer: {e}")))?;

        debouncer
            .watch(layout.root(), RecursiveMode::Recursive)
            .map_err(|e| EngineError::Internal(format!("failed to watch {}: {e}", layout.root().display())))?;

        self.watches.insert(repository_id, RepositoryWatch { _debouncer: debouncer });
        Ok(())
    }

    /// Stops watching a repository. File records are left untouched.
    pub fn unwatch(&self, repository_id: RepositoryId) {
        self.watches.remove(&repository_id);
    }

    pub fn is_watching(&self, repository_id: RepositoryId) -> bool {
        self.watches.contains_key(&repository_id)
    }
}

/// Maps one debounced event to an index mutation, spawning the work so the
/// debouncer's callback thread never blocks on I/O or hashing.
fn dispatch_event(
    event: &DebouncedEvent,
    repository_id: RepositoryId,
    layout: &RepositoryLayout,
    index: &Arc<dyn FileIndex>,
    semaphore: &Arc<Semaphore>,
) {
    #[allow(deprecated)]
    let notify_event = &event.event;

    let kind = notify_event.kind;
    if !matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
        return;
    }

    let Some(path) = notify_event.paths.first().cloned() else {
        return;
    };
    if should_ignore(&path, layout) {
        return;
    }

    let index = index.clone();
    let layout = layout.clone();
    let semaphore = semaphore.clone();
    tokio::spawn(async move {
        let result = match kind {
            EventKind::Remove(_) => handle_removed(&index, &layout, repository_id, &path).await,
            _ => handle_created_or_modified(&index, &layout, repository_id, &path, &semaphore).await,
        };
        if let Err(e) = result {
            error!(error = %e, path = %path.display(), "file watch event handling failed");
        }
    });
}

async fn handle_removed(
    index: &Arc<dyn FileIndex>,
    layout: &RepositoryLayout,
    repository_id: RepositoryId,
    path: &Path,
) -> Result<()> {
    let Some(relative) = relative_path(layout, path) else {
        return Ok(());
    };
    debug!(path = %relative, "file removed, deleting file record");
    index.delete_file_record(repository_id, &relative).await
}

async fn handle_created_or_modified(
    index: &Arc<dyn FileIndex>,
    layout: &RepositoryLayout,
    repository_id: RepositoryId,
    path: &Path,
    semaphore: &Arc<Semaphore>,
) -> Result<()> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if metadata.is_dir() {
        // A directory create event only carries the directory's own path;
        // anything already inside it (a bulk copy that raced the watch)
        // needs to be picked up explicitly.
        return enumerate_existing_contents(index, layout, repository_id, path, semaphore).await;
    }
    if !metadata.is_file() {
        return Ok(());
    }

    upsert_one_file(index, layout, repository_id, path, &metadata, semaphore).await
}

async fn enumerate_existing_contents(
    index: &Arc<dyn FileIndex>,
    layout: &RepositoryLayout,
    repository_id: RepositoryId,
    dir: &Path,
    semaphore: &Arc<Semaphore>,
) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if should_ignore(&path, layout) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            upsert_one_file(index, layout, repository_id, &path, &metadata, semaphore).await?;
        } else if metadata.is_dir() {
            Box::pin(enumerate_existing_contents(index, layout, repository_id, &path, semaphore)).await?;
        }
    }
    Ok(())
}

async fn upsert_one_file(
    index: &Arc<dyn FileIndex>,
    layout: &RepositoryLayout,
    repository_id: RepositoryId,
    path: &Path,
    metadata: &std::fs::Metadata,
    semaphore: &Arc<Semaphore>,
) -> Result<()> {
    let Some(relative) = relative_path(layout, path) else {
        return Ok(());
    };

    let content_hash = {
        let _permit = semaphore.acquire().await.map_err(|_| EngineError::Cancelled)?;
        hash_file(path).await.ok()
    };

    let record = FileRecord {
        repository_id,
        relative_path: relative,
        size_bytes: metadata.len(),
        modified_at: metadata.modified().map(chrono::DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
        content_hash,
        last_scanned_at: Utc::now(),
        scan_generation: current_generation(),
    };
    index.upsert_file_record(&record).await
}

fn relative_path(layout: &RepositoryLayout, path: &Path) -> Option<String> {
    layout.relativize(path).map(|p| p.to_string_lossy().replace('\\', "/"))
}

/// Ignore rule shared by the watcher and the reconciliation scanner's
/// directory walk: hidden files, backup suffix, temp suffixes,
/// well-known OS junk, and the `.system`/`inbox` protected subtrees.
pub(crate) fn should_ignore(path: &Path, layout: &RepositoryLayout) -> bool {
    if layout.is_protected(path) {
        return true;
    }
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => {
            name.starts_with('.') || name.ends_with('~') || name.ends_with(".tmp") || name.ends_with(".temp") || name == "Thumbs.db"
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_hidden_and_temp_files() {
        let layout = RepositoryLayout::new("/repo");
        assert!(should_ignore(Path::new("/repo/Vacation/.DS_Store"), &layout));
        assert!(should_ignore(Path::new("/repo/Vacation/img.jpg~"), &layout));
        assert!(should_ignore(Path::new("/repo/Vacation/img.jpg.tmp"), &layout));
        assert!(should_ignore(Path::new("/repo/Vacation/Thumbs.db"), &layout));
        assert!(should_ignore(Path::new("/repo/inbox/2024/img.jpg"), &layout));
        assert!(!should_ignore(Path::new("/repo/Vacation/img.jpg"), &layout));
    }
}
