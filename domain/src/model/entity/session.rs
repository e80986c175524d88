use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::task::TaskId;
use super::SessionId;

/// A partially-assembled chunked upload. One session holds at most one of
/// these at a time (a second `upload_request` replaces it).
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub task_id: TaskId,
    pub expected_size: u64,
    pub expected_hash: String,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub received: Vec<bool>,
    pub temp_path: std::path::PathBuf,
}

impl PendingUpload {
    pub fn new(
        task_id: TaskId,
        expected_size: u64,
        expected_hash: String,
        chunk_size: u64,
        total_chunks: u64,
        temp_path: std::path::PathBuf,
    ) -> Self {
        Self {
            task_id,
            expected_size,
            expected_hash,
            chunk_size,
            total_chunks,
            received: vec![false; total_chunks as usize],
            temp_path,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received.iter().all(|&r| r)
    }
}

/// Per-connection conversation state. Owned entirely by the session layer;
/// the task manager only ever sees the opaque `SessionId`.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: SessionId,
    pub authenticated: bool,
    pub created_task_ids: HashSet<TaskId>,
    pub subscribed_task_ids: HashSet<TaskId>,
    pub pending_upload: Option<PendingUpload>,
    pub last_seen_at: DateTime<Utc>,
}

impl Session {
    pub fn new(connection_id: SessionId) -> Self {
        Self {
            connection_id,
            authenticated: false,
            created_task_ids: HashSet::new(),
            subscribed_task_ids: HashSet::new(),
            pending_upload: None,
            last_seen_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
    }

    pub fn note_created(&mut self, task_id: TaskId) {
        self.created_task_ids.insert(task_id);
        self.subscribed_task_ids.insert(task_id);
    }
}
