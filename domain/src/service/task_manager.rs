use chrono::{DateTime, Utc};

use crate::error::TaskError;
use crate::model::entity::{OutputFormat, SessionId, SubmitRequest, TaskId, TaskOutcome, TaskStatus};

/// Result of `TaskManager::begin_submission`. A cache hit carries the fully
/// rendered completion payload and never touches the queue; otherwise the
/// caller (the session layer) receives a `task_id` to address subsequent
/// `upload_chunk`/`upload_data` messages and must call `blob_ready` once the
/// blob store reports the artifact fully assembled.
///
/// This two-phase split resolves the spec's open question of whether a cache
/// hit should be observable synchronously inside `Submit`'s reply or as a
/// later event: here it is synchronous, returned directly from
/// `begin_submission` (see DESIGN.md).
#[derive(Debug, Clone)]
pub enum BeginOutcome {
    CacheHit {
        task_id: TaskId,
        format: OutputFormat,
        file_name: String,
        file_hash: String,
        payload: String,
    },
    PendingUpload {
        task_id: TaskId,
    },
}

#[derive(Debug, Clone, Copy)]
pub enum EnqueueOutcome {
    Queued { queue_position: usize, estimated_wait_minutes: f64 },
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Already processing or terminal; the engine is never interrupted.
    NoEffect,
}

/// Answer to a `task_status` query — the session layer's only window into a
/// task it did not just create, addressed purely by opaque `task_id`.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<TaskOutcome>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskManagerStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub queue_size: usize,
    pub max_queue_size: usize,
    pub max_concurrent: usize,
}

/// Sole arbiter of task admission, ordering, execution, retry, and completion
/// notification (§4.1). Implemented once in `service::task_manager` and
/// shared as an `Arc<dyn TaskManager>` process-wide.
#[async_trait::async_trait]
pub trait TaskManager: Send + Sync {
    async fn begin_submission(&self, req: SubmitRequest) -> Result<BeginOutcome, TaskError>;

    /// Called by the session layer once the blob store confirms `task_id`'s
    /// artifact is fully assembled and hash-verified. Increments the blob
    /// refcount and offers the task to the queue.
    async fn blob_ready(&self, task_id: TaskId) -> Result<EnqueueOutcome, TaskError>;

    /// Releases the partial blob reservation without ever admitting the task
    /// (e.g. the session disconnected mid-upload, or the assembled hash
    /// mismatched). Idempotent.
    async fn abandon(&self, task_id: TaskId);

    async fn subscribe(&self, task_id: TaskId, session_id: SessionId) -> Result<(), TaskError>;

    /// Idempotent; does not cancel processing even if it removes the last
    /// subscriber.
    async fn unsubscribe(&self, task_id: TaskId, session_id: SessionId);

    async fn cancel(&self, task_id: TaskId, session_id: SessionId) -> Result<CancelOutcome, TaskError>;

    /// Answers an inbound `task_status` message. Does not imply subscription;
    /// the session layer calls `subscribe` separately if it wants future
    /// fan-out for a task it did not create.
    async fn task_snapshot(&self, task_id: TaskId) -> Result<TaskSnapshot, TaskError>;

    async fn stats(&self) -> TaskManagerStats;
}
