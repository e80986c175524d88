use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SessionId;

pub type TaskId = Uuid;

/// Client-requested output. Mirrors the `output_format` wire field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Srt,
}

/// Lifecycle state. See the state machine table in the spec's Task Manager
/// section: exactly one terminal transition per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Outcome recorded on a terminal task, used to answer `task_status` queries
/// without re-deriving anything from the cache.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed { file_hash: String },
    Failed { code: String, message: String },
    Cancelled,
}

/// A unit of scheduled work. Owned exclusively by the task manager; the
/// session layer only ever holds opaque `TaskId`s.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub file_hash: String,
    pub file_name: String,
    pub file_size: u64,
    pub output_format: OutputFormat,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub creator_session_id: SessionId,
    pub subscriber_session_ids: HashSet<SessionId>,
    pub outcome: Option<TaskOutcome>,
}

impl Task {
    pub fn new(
        id: TaskId,
        file_hash: String,
        file_name: String,
        file_size: u64,
        output_format: OutputFormat,
        creator_session_id: SessionId,
    ) -> Self {
        Self {
            id,
            file_hash,
            file_name,
            file_size,
            output_format,
            status: TaskStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            creator_session_id,
            subscriber_session_ids: HashSet::from([creator_session_id]),
            outcome: None,
        }
    }
}

/// What the session layer asks the task manager to do once it has validated
/// an `upload_request` (size, extension) but before the blob has necessarily
/// finished streaming in.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: String,
    pub output_format: OutputFormat,
    pub force_refresh: bool,
    pub creator_session_id: SessionId,
}
