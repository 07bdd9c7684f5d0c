use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ids::RepositoryId;

/// Physical layout strategy for committed originals under `inbox/`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStrategy {
    /// `inbox/YYYY/MM/<name>` keyed off taken-time, else upload time.
    Date,
    /// `inbox/<name>`.
    Flat,
    /// `inbox/ab/cd/ef/<hash><ext>`, falls back to `Date` when no hash.
    Cas,
}

/// What to do when the destination filename in `inbox/` already exists.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateFilenamePolicy {
    Rename,
    Uuid,
    Overwrite,
}

/// Per-repository settings read from the repository's config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalSettings {
    #[serde(default = "default_true")]
    pub preserve_original_filename: bool,
    #[serde(default = "default_duplicate_policy")]
    pub handle_duplicate_filenames: DuplicateFilenamePolicy,
    /// Kilobytes; 0 = unlimited.
    #[serde(default)]
    pub max_file_size: u64,
}

fn default_true() -> bool {
    true
}

fn default_duplicate_policy() -> DuplicateFilenamePolicy {
    DuplicateFilenamePolicy::Rename
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            preserve_original_filename: true,
            handle_duplicate_filenames: DuplicateFilenamePolicy::Rename,
            max_file_size: 0,
        }
    }
}

/// Deserialized contents of the repository's root config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryConfigFile {
    pub version: u32,
    pub storage_strategy: StorageStrategy,
    #[serde(default)]
    pub local_settings: LocalSettings,
}

impl Default for RepositoryConfigFile {
    fn default() -> Self {
        Self {
            version: 1,
            storage_strategy: StorageStrategy::Date,
            local_settings: LocalSettings::default(),
        }
    }
}

/// A registered repository.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub root: PathBuf,
    pub config: RepositoryConfigFile,
    pub status: RepositoryStatus,
    pub last_sync_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryStatus {
    Active,
    Paused,
    Error,
}
