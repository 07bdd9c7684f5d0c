//! Per-asset lifecycle status: processing, complete, warning, or failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Names of the subtasks the processor and retry processor run. Kept as an
/// open string set (not an enum) because new subtask kinds can be added
/// without a migration; callers that need exhaustiveness match on
/// `SubtaskName::as_str()` constants below instead.
pub mod subtask {
    pub const EXTRACT_EXIF: &str = "extract_exif";
    pub const EXTRACT_METADATA: &str = "extract_metadata";
    pub const GENERATE_THUMBNAILS: &str = "generate_thumbnails";
    pub const SAVE_THUMBNAILS: &str = "save_thumbnails";
    pub const TRANSCODE_VIDEO: &str = "transcode_video";
    pub const TRANSCODE_AUDIO: &str = "transcode_audio";
    pub const GENERATE_WEB_VERSION: &str = "generate_web_version";
    pub const CLIP_PROCESSING: &str = "clip_processing";
    pub const RAW_PROCESSING: &str = "raw_processing";
    pub const INITIAL_VALIDATION: &str = "initial_validation";
    pub const FILE_READ: &str = "file_read";
    pub const FILE_CORRUPTED: &str = "file_corrupted";

    /// Subtask failures in this set are always terminal: the asset moves to
    /// `failed` and cannot be recovered by a selective retry.
    pub const FATAL: &[&str] = &[INITIAL_VALIDATION, FILE_READ, FILE_CORRUPTED];

    pub fn is_fatal(name: &str) -> bool {
        FATAL.contains(&name)
    }
}

/// One recorded subtask failure, in the order subtasks completed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    pub task: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl TaskError {
    pub fn new(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// The four terminal/non-terminal states an asset can occupy.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssetStatus {
    Processing,
    Complete,
    Warning { errors: Vec<TaskError> },
    Failed { errors: Vec<TaskError> },
}

impl AssetStatus {
    pub fn errors(&self) -> &[TaskError] {
        match self {
            AssetStatus::Warning { errors } | AssetStatus::Failed { errors } => errors,
            _ => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AssetStatus::Processing)
    }

    /// Derives the terminal status from a set of collected subtask errors:
    /// any fatal error wins outright, any non-fatal error yields a warning,
    /// no errors yields complete.
    pub fn from_errors(errors: Vec<TaskError>) -> Self {
        if errors.is_empty() {
            return AssetStatus::Complete;
        }
        if errors.iter().any(|e| subtask::is_fatal(&e.task)) {
            AssetStatus::Failed { errors }
        } else {
            AssetStatus::Warning { errors }
        }
    }
}
