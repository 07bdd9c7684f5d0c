use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AssetId, RepositoryId, UserId};
use crate::kind::AssetKind;
use crate::metadata::AssetMetadata;
use crate::status::AssetStatus;

/// Persistent record of a media file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub repository_id: RepositoryId,
    pub owner_id: UserId,

    pub kind: AssetKind,
    pub mime_type: String,

    pub original_filename: String,
    /// Relative to the repository root, e.g. `inbox/2024/07/foo.jpg`. `None`
    /// until the commit step of ingestion succeeds.
    pub storage_path: Option<String>,
    pub size_bytes: u64,
    pub content_hash: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<f64>,

    pub uploaded_at: DateTime<Utc>,
    pub taken_at: Option<DateTime<Utc>>,
    pub modified_at: DateTime<Utc>,

    pub rating: u8,
    pub liked: bool,
    pub description: Option<String>,

    pub metadata: AssetMetadata,
    pub status: AssetStatus,

    pub deleted: bool,
}

impl Asset {
    /// Constructs the row written at the *start* of ingestion: storage path
    /// unset, status `processing`, identity already assigned.
    pub fn new_processing(
        repository_id: RepositoryId,
        owner_id: UserId,
        kind: AssetKind,
        mime_type: impl Into<String>,
        original_filename: impl Into<String>,
        size_bytes: u64,
        content_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: AssetId::new(),
            repository_id,
            owner_id,
            kind,
            mime_type: mime_type.into(),
            original_filename: original_filename.into(),
            storage_path: None,
            size_bytes,
            content_hash: content_hash.into(),
            width: None,
            height: None,
            duration_secs: None,
            uploaded_at: now,
            taken_at: None,
            modified_at: now,
            rating: 0,
            liked: false,
            description: None,
            metadata: AssetMetadata::None,
            status: AssetStatus::Processing,
            deleted: false,
        }
    }
}

/// Distinguishes one of the three generated thumbnail sizes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbnailSize {
    Small,
    Medium,
    Large,
}

impl ThumbnailSize {
    pub const ALL: [ThumbnailSize; 3] = [
        ThumbnailSize::Small,
        ThumbnailSize::Medium,
        ThumbnailSize::Large,
    ];

    /// Longest-edge target in pixels.
    pub fn max_edge(self) -> u32 {
        match self {
            ThumbnailSize::Small => 256,
            ThumbnailSize::Medium => 768,
            ThumbnailSize::Large => 1600,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThumbnailSize::Small => "small",
            ThumbnailSize::Medium => "medium",
            ThumbnailSize::Large => "large",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thumbnail {
    pub id: crate::ids::ThumbnailId,
    pub asset_id: AssetId,
    pub size: ThumbnailSize,
    pub relative_path: String,
    pub mime_type: String,
}

/// One ML embedding vector for an asset. At most one per
/// (asset, kind) may be `primary`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Embedding {
    pub id: crate::ids::EmbeddingId,
    pub asset_id: AssetId,
    pub embedding_kind: String,
    pub model: String,
    pub vector: Vec<f32>,
    pub primary: bool,
}

/// One label prediction for an asset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LabelPrediction {
    pub asset_id: AssetId,
    pub label: String,
    pub score: f32,
    pub group: Option<String>,
}
