//! Row-level types for the durable job queue.

use chrono::{DateTime, Utc};
use emulsion_model::{JobId, JobPayload, QueueName};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobState {
    Ready,
    Leased,
    Completed,
    Failed,
    DeadLetter,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Ready => "ready",
            JobState::Leased => "leased",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::DeadLetter => "dead_letter",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(JobState::Ready),
            "leased" => Some(JobState::Leased),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "dead_letter" => Some(JobState::DeadLetter),
            _ => None,
        }
    }
}

/// A job claimed off a queue, handed to a worker for execution. Holding
/// this is what entitles a worker to call `complete`/`fail` on it.
#[derive(Debug)]
pub struct ClaimedJob {
    pub id: JobId,
    pub queue: QueueName,
    pub payload: JobPayload,
    pub priority: i32,
    pub attempts: u32,
    pub lease_owner: String,
    pub lease_expires_at: DateTime<Utc>,
}
