use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{RepositoryId, SyncOperationId};

/// Tracks a user-managed file independent of the asset pipeline. Deliberately carries no foreign key to an asset row — the sync
/// subsystem and ingestion schema must be able to evolve independently
///.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRecord {
    pub repository_id: RepositoryId,
    pub relative_path: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub content_hash: Option<String>,
    pub last_scanned_at: DateTime<Utc>,
    pub scan_generation: i64,
}

/// What triggered a sync operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperationKind {
    Startup,
    Realtime,
    Reconciliation,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperationStatus {
    Running,
    Completed,
    Failed,
}

/// History row for one watcher/reconciliation pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: SyncOperationId,
    pub repository_id: RepositoryId,
    pub kind: SyncOperationKind,
    pub scanned: u64,
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SyncOperationStatus,
    pub error_message: Option<String>,
}

impl SyncOperation {
    pub fn start(repository_id: RepositoryId, kind: SyncOperationKind) -> Self {
        Self {
            id: SyncOperationId::new(),
            repository_id,
            kind,
            scanned: 0,
            added: 0,
            updated: 0,
            removed: 0,
            started_at: Utc::now(),
            ended_at: None,
            status: SyncOperationStatus::Running,
            error_message: None,
        }
    }

    pub fn finish_ok(&mut self) {
        self.ended_at = Some(Utc::now());
        self.status = SyncOperationStatus::Completed;
    }

    pub fn finish_err(&mut self, message: impl Into<String>) {
        self.ended_at = Some(Utc::now());
        self.status = SyncOperationStatus::Failed;
        self.error_message = Some(message.into());
    }
}
