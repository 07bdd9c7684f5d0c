//! Stage → commit → fail lifecycle for incoming uploads.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use emulsion_model::{DuplicateFilenamePolicy, StorageStrategy};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::layout::RepositoryLayout;

pub struct StagingManager {
    layout: RepositoryLayout,
}

impl StagingManager {
    pub fn new(layout: RepositoryLayout) -> Self {
        Self { layout }
    }

    /// Streams `reader` into a uniquely named file under
    /// `.system/staging/incoming/`. No size fixup happens here; the caller
    /// is responsible for enqueueing the processing job afterwards.
    ///
    /// `max_bytes` enforces the repository's configured upload ceiling
    /// (`0` means unlimited) synchronously, at stage time, rather than
    /// waiting for a worker to pick the job up — the staged bytes never
    /// touch `inbox/` or a job payload if they're over limit.
    pub async fn stage<R>(&self, mut reader: R, original_filename: &str, max_bytes: u64) -> Result<PathBuf>
    where
        R: AsyncRead + Unpin,
    {
        fs::create_dir_all(self.layout.staging_incoming()).await?;

        let ext = Path::new(original_filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let name = if ext.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            format!("{}.{}", Uuid::new_v4(), ext)
        };
        let staged_path = self.layout.staging_incoming().join(&name);

        let mut file = fs::File::create(&staged_path).await?;
        let mut buf = [0u8; 64 * 1024];
        let mut written: u64 = 0;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if max_bytes > 0 && written > max_bytes {
                drop(file);
                fs::remove_file(&staged_path).await.ok();
                warn!(original_filename, max_bytes, "rejected upload exceeding configured size limit");
                return Err(EngineError::InvalidRequest(format!(
                    "upload exceeds the repository's configured maximum of {max_bytes} bytes"
                )));
            }
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;

        info!(path = %staged_path.display(), "staged upload");
        Ok(staged_path)
    }

    /// Resolves the destination under `inbox/` per `strategy`, atomically
    /// renames the staged file into place, and returns the inbox-relative
    /// storage path. On failure the staged file is left exactly where it
    /// was so retry machinery can re-attempt.
    pub async fn commit(
        &self,
        staged_path: &Path,
        original_filename: &str,
        content_hash: Option<&str>,
        taken_at: Option<DateTime<Utc>>,
        strategy: StorageStrategy,
        duplicate_policy: DuplicateFilenamePolicy,
    ) -> Result<String> {
        let inbox_root = self.layout.inbox_root();
        fs::create_dir_all(&inbox_root).await?;

        let relative_dir = match strategy {
            StorageStrategy::Flat => PathBuf::new(),
            StorageStrategy::Date => date_subdir(taken_at.unwrap_or_else(Utc::now)),
            StorageStrategy::Cas => match content_hash {
                Some(hash) => cas_subdir(hash),
                None => date_subdir(taken_at.unwrap_or_else(Utc::now)),
            },
        };

        let dest_dir = inbox_root.join(&relative_dir);
        fs::create_dir_all(&dest_dir).await?;

        let filename = match strategy {
            StorageStrategy::Cas if content_hash.is_some() => {
                let ext = Path::new(original_filename)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("");
                let hash = content_hash.unwrap().to_ascii_lowercase();
                if ext.is_empty() {
                    hash
                } else {
                    format!("{hash}.{ext}")
                }
            }
            _ => original_filename.to_string(),
        };

        let mut dest_path = dest_dir.join(&filename);
        dest_path = resolve_collision(&dest_path, duplicate_policy).await?;

        // Same-filesystem rename is atomic; staging and inbox share a root.
        match fs::rename(staged_path, &dest_path).await {
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, staged = %staged_path.display(), "commit rename failed, staged file left in place");
                return Err(EngineError::Io(e));
            }
        }

        let storage_path = self
            .layout
            .relativize(&dest_path)
            .unwrap_or(&dest_path)
            .to_string_lossy()
            .replace('\\', "/");

        info!(storage_path = %storage_path, "committed asset to inbox");
        Ok(storage_path)
    }

    /// Moves a staged file to `.system/staging/failed/` for inspection.
    pub async fn fail(&self, staged_path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(self.layout.staging_failed()).await?;
        let filename = staged_path
            .file_name()
            .ok_or_else(|| EngineError::Internal("staged path has no filename".into()))?;
        let dest = self.layout.staging_failed().join(filename);
        fs::rename(staged_path, &dest).await?;
        warn!(path = %dest.display(), "moved staged file to failed directory");
        Ok(dest)
    }
}

fn date_subdir(when: DateTime<Utc>) -> PathBuf {
    PathBuf::from(format!("{:04}", when.format("%Y")))
        .join(format!("{:02}", when.format("%m").to_string().parse::<u32>().unwrap_or(1)))
}

/// `ab/cd/ef` from the first three two-hex-char slices of a lowercase hash.
fn cas_subdir(hash: &str) -> PathBuf {
    let hash = hash.to_ascii_lowercase();
    let bytes: Vec<&str> = (0..hash.len())
        .step_by(2)
        .map(|i| &hash[i..(i + 2).min(hash.len())])
        .take(3)
        .collect();
    let mut path = PathBuf::new();
    for slice in bytes {
        path.push(slice);
    }
    path
}

async fn resolve_collision(
    candidate: &Path,
    policy: DuplicateFilenamePolicy,
) -> Result<PathBuf> {
    if !fs::try_exists(candidate).await.unwrap_or(false) {
        return Ok(candidate.to_path_buf());
    }

    match policy {
        DuplicateFilenamePolicy::Overwrite => Ok(candidate.to_path_buf()),
        DuplicateFilenamePolicy::Uuid => {
            let stem = candidate
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("file");
            let ext = candidate.extension().and_then(|e| e.to_str());
            let short_uuid = Uuid::new_v4().simple().to_string()[..8].to_string();
            let name = match ext {
                Some(ext) => format!("{stem}_{short_uuid}.{ext}"),
                None => format!("{stem}_{short_uuid}"),
            };
            Ok(candidate.with_file_name(name))
        }
        DuplicateFilenamePolicy::Rename => {
            let stem = candidate
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("file");
            let ext = candidate.extension().and_then(|e| e.to_str());
            let mut n = 1u32;
            loop {
                let name = match ext {
                    Some(ext) => format!("{stem} ({n}).{ext}"),
                    None => format!("{stem} ({n})"),
                };
                let attempt = candidate.with_file_name(name);
                if !fs::try_exists(&attempt).await.unwrap_or(false) {
                    return Ok(attempt);
                }
                n += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn layout(root: &Path) -> RepositoryLayout {
        RepositoryLayout::new(root)
    }

    #[tokio::test]
    async fn stage_writes_unique_filename_under_incoming() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StagingManager::new(layout(dir.path()));
        let path = manager
            .stage(Cursor::new(b"hello".to_vec()), "photo.jpg", 0)
            .await
            .unwrap();
        assert!(path.starts_with(dir.path().join(".system/staging/incoming")));
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn stage_rejects_upload_over_configured_max_and_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StagingManager::new(layout(dir.path()));
        let err = manager
            .stage(Cursor::new(b"hello world".to_vec()), "photo.jpg", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));

        let incoming = dir.path().join(".system/staging/incoming");
        let mut entries = tokio::fs::read_dir(&incoming).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stage_allows_upload_at_unlimited_max() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StagingManager::new(layout(dir.path()));
        let path = manager
            .stage(Cursor::new(b"hello world".to_vec()), "photo.jpg", 0)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn commit_date_strategy_uses_taken_time() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        let manager = StagingManager::new(l.clone());
        let staged = manager
            .stage(Cursor::new(b"data".to_vec()), "a.jpg", 0)
            .await
            .unwrap();

        let taken = DateTime::parse_from_rfc3339("2024-07-01T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let storage_path = manager
            .commit(
                &staged,
                "a.jpg",
                Some("deadbeef"),
                Some(taken),
                StorageStrategy::Date,
                DuplicateFilenamePolicy::Rename,
            )
            .await
            .unwrap();

        assert_eq!(storage_path, "inbox/2024/07/a.jpg");
        assert!(!tokio::fs::try_exists(&staged).await.unwrap());
    }

    #[tokio::test]
    async fn commit_cas_strategy_shards_by_hash() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        let manager = StagingManager::new(l.clone());
        let staged = manager
            .stage(Cursor::new(b"data".to_vec()), "a.jpg", 0)
            .await
            .unwrap();

        let storage_path = manager
            .commit(
                &staged,
                "a.jpg",
                Some("abcdef0123456789"),
                None,
                StorageStrategy::Cas,
                DuplicateFilenamePolicy::Rename,
            )
            .await
            .unwrap();

        assert_eq!(storage_path, "inbox/ab/cd/ef/abcdef0123456789.jpg");
    }

    #[tokio::test]
    async fn commit_cas_without_hash_falls_back_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        let manager = StagingManager::new(l.clone());
        let staged = manager
            .stage(Cursor::new(b"data".to_vec()), "a.jpg", 0)
            .await
            .unwrap();

        let taken = DateTime::parse_from_rfc3339("2024-01-15T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let storage_path = manager
            .commit(
                &staged,
                "a.jpg",
                None,
                Some(taken),
                StorageStrategy::Cas,
                DuplicateFilenamePolicy::Rename,
            )
            .await
            .unwrap();

        assert_eq!(storage_path, "inbox/2024/01/a.jpg");
    }

    #[tokio::test]
    async fn rename_policy_appends_counter_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        tokio::fs::create_dir_all(l.inbox_root()).await.unwrap();
        tokio::fs::write(l.inbox_root().join("a.jpg"), b"existing")
            .await
            .unwrap();

        let manager = StagingManager::new(l.clone());
        let staged = manager
            .stage(Cursor::new(b"data".to_vec()), "a.jpg", 0)
            .await
            .unwrap();
        let storage_path = manager
            .commit(
                &staged,
                "a.jpg",
                None,
                None,
                StorageStrategy::Flat,
                DuplicateFilenamePolicy::Rename,
            )
            .await
            .unwrap();

        assert_eq!(storage_path, "inbox/a (1).jpg");
    }

    #[tokio::test]
    async fn fail_moves_staged_file_to_failed_dir() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        let manager = StagingManager::new(l.clone());
        let staged = manager
            .stage(Cursor::new(b"data".to_vec()), "bad.jpg", 0)
            .await
            .unwrap();

        let failed_path = manager.fail(&staged).await.unwrap();
        assert!(failed_path.starts_with(l.staging_failed()));
        assert!(!tokio::fs::try_exists(&staged).await.unwrap());
    }
}
