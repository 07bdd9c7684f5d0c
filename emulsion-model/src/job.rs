//! Typed job payloads carried by the durable queue. The
//! queue component itself owns scheduling/persistence; these types are the
//! contract the rest of the system enqueues and consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AssetId, RepositoryId, UserId};

/// The three named queues, each with its own worker pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    ProcessAsset,
    ProcessMl,
    RetryAsset,
}

impl QueueName {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::ProcessAsset => "process_asset",
            QueueName::ProcessMl => "process_ml",
            QueueName::RetryAsset => "retry_asset",
        }
    }

    /// Default bounded worker concurrency per queue.
    pub fn default_max_workers(self) -> u32 {
        match self {
            QueueName::ProcessAsset => 5,
            QueueName::ProcessMl => 1,
            QueueName::RetryAsset => 2,
        }
    }

    /// Default claim priority when a caller doesn't specify one. Higher
    /// values are claimed first within a queue. A user-initiated retry
    /// jumps the line ahead of routine ingestion; ML inference, already
    /// decoupled onto its own queue, is the least urgent of the three.
    pub fn default_priority(self) -> i32 {
        match self {
            QueueName::RetryAsset => 10,
            QueueName::ProcessAsset => 5,
            QueueName::ProcessMl => 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessAssetPayload {
    pub staged_path: String,
    pub client_hash: String,
    pub user_id: UserId,
    pub repository_id: RepositoryId,
    pub original_filename: String,
    pub mime: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessMlPayload {
    pub asset_id: AssetId,
    pub image_bytes: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryAssetPayload {
    pub asset_id: AssetId,
    pub tasks: Vec<String>,
}

/// Tagged union of every payload the queue can carry.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "queue", content = "payload", rename_all = "snake_case")]
pub enum JobPayload {
    ProcessAsset(ProcessAssetPayload),
    ProcessMl(ProcessMlPayload),
    RetryAsset(RetryAssetPayload),
}

impl JobPayload {
    pub fn queue_name(&self) -> QueueName {
        match self {
            JobPayload::ProcessAsset(_) => QueueName::ProcessAsset,
            JobPayload::ProcessMl(_) => QueueName::ProcessMl,
            JobPayload::RetryAsset(_) => QueueName::RetryAsset,
        }
    }
}
