//! Filesystem synchronization subsystem: keeps a database file
//! index consistent with the user-owned contents of managed repositories,
//! independent of the ingestion pipeline that lives in the rest of this
//! crate. The watcher and reconciliation scanner are two paths to the same
//! [`FileIndex`] writes; the scanner is the safety net for whatever the
//! watcher misses under event-rate spikes.

pub mod file_index;
pub mod file_index_postgres;
pub mod manager;
pub mod reconciliation;
pub mod watcher;

pub use file_index::FileIndex;
pub use file_index_postgres::PostgresFileIndex;
pub use manager::{SyncManager, SyncStatus};
pub use reconciliation::{ReconciliationScanner, ReconciliationSettings};
pub use watcher::FileWatcher;

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::Result;

/// A fresh scan generation: wall-clock seconds. Monotonic enough to compare
/// against a file record's `scan_generation` after one reconciliation pass
///; two passes within the same second simply share a
/// generation, which only widens the window a record counts as "current".
pub fn current_generation() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Streaming SHA-256 of a file on disk, shared by the watcher and the
/// reconciliation scanner so both compute content hashes the same way.
pub(crate) async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
