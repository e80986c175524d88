use crate::model::entity::{OutputFormat, SessionId, TaskId, TaskStatus};

/// Everything the task manager ever tells the outside world. The manager
/// computes *who* should see an event (the current subscriber set) and hands
/// both to the sink; the sink (the session layer's fan-out registry) has no
/// knowledge of task internals, keeping task <-> session a non-owning,
/// lookup-based relationship (see spec §9, "Cyclic references").
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// Emitted once, only for non-cache-hit admissions, before the first
    /// progress event.
    Queued {
        task_id: TaskId,
        queue_position: usize,
        estimated_wait_minutes: f64,
    },
    /// `detail` carries the transient-failure message when this progress
    /// event represents a retry-triggering failure rather than genuine
    /// forward progress (see scenario 5 in the spec's end-to-end tests).
    Progress {
        task_id: TaskId,
        percent: u8,
        status: TaskStatus,
        detail: Option<String>,
    },
    Complete {
        task_id: TaskId,
        format: OutputFormat,
        file_name: String,
        file_hash: String,
        payload: String,
    },
    Failed {
        task_id: TaskId,
        code: String,
        message: String,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Queued { task_id, .. }
            | Self::Progress { task_id, .. }
            | Self::Complete { task_id, .. }
            | Self::Failed { task_id, .. } => *task_id,
        }
    }
}

/// The fan-out boundary the task manager dispatches events through. A
/// session that has gone away is silently pruned by the implementation —
/// the task manager never learns about delivery failures.
#[async_trait::async_trait]
pub trait TaskEventSink: Send + Sync {
    async fn dispatch(&self, event: TaskEvent, recipients: &[SessionId]);
}
