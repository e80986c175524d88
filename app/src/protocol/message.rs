//! Wire protocol (§6): a single WebSocket text-frame envelope,
//! `{ "type": <string>, "data": <object> }`, binary payloads base64-encoded
//! inside `data`. This module owns both directions of that envelope.

use domain::model::entity::{OutputFormat, TaskId, TaskStatus};
use domain::service::TaskEvent;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// An inbound frame before its `data` has been interpreted as one of the
/// recognized message kinds.
#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    #[default]
    Single,
    Chunked,
}

#[derive(Debug, Deserialize)]
pub struct AuthData {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequestData {
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: String,
    #[serde(default)]
    pub force_refresh: bool,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub upload_mode: UploadMode,
    pub chunk_size: Option<u64>,
    pub total_chunks: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UploadDataData {
    pub task_id: Uuid,
    /// The whole artifact, base64-encoded.
    pub file_data: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadChunkData {
    pub task_id: Uuid,
    pub chunk_index: u64,
    pub chunk_size: u64,
    pub chunk_hash: String,
    /// This chunk's bytes, base64-encoded.
    pub chunk_data: String,
    #[serde(default)]
    pub is_last: bool,
}

#[derive(Debug, Deserialize)]
pub struct TaskStatusData {
    pub task_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CancelData {
    pub task_id: Uuid,
}

/// One rendered outbound frame, ready to serialize straight onto the socket.
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: Value,
}

impl OutboundEnvelope {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("an OutboundEnvelope always serializes")
    }

    pub fn connected(connection_id: Uuid) -> Self {
        Self { kind: "connected", data: json!({ "connection_id": connection_id }) }
    }

    pub fn auth_ok() -> Self {
        Self { kind: "auth_ok", data: json!({}) }
    }

    pub fn upload_ready(task_id: TaskId) -> Self {
        Self { kind: "upload_ready", data: json!({ "task_id": task_id }) }
    }

    pub fn chunk_received(task_id: TaskId, chunk_index: u64, status: &str) -> Self {
        Self { kind: "chunk_received", data: json!({ "task_id": task_id, "chunk_index": chunk_index, "status": status }) }
    }

    pub fn upload_complete(task_id: TaskId) -> Self {
        Self { kind: "upload_complete", data: json!({ "task_id": task_id }) }
    }

    pub fn pong() -> Self {
        Self { kind: "pong", data: json!({}) }
    }

    pub fn error(code: &str, message: &str, task_id: Option<TaskId>) -> Self {
        Self { kind: "error", data: json!({ "code": code, "message": message, "task_id": task_id }) }
    }

    /// Built directly from a task manager `CancelOutcome`/`TaskSnapshot` read
    /// rather than via the event sink — this is a direct reply to the
    /// requesting session, not a fan-out broadcast.
    pub fn task_progress_status(task_id: TaskId, status: TaskStatus, retry_count: u32) -> Self {
        Self {
            kind: "task_progress",
            data: json!({ "task_id": task_id, "status": status.to_string(), "retry_count": retry_count }),
        }
    }

    /// Maps a [`TaskEvent`] emitted by the task manager to its wire form.
    /// `Queued` -> `task_queued`, `Progress` -> `task_progress` (also used
    /// for the terminal-failure case per §7: "a failure `task_progress` with
    /// status `Failed`"), `Complete` -> `task_complete`.
    pub fn from_task_event(event: &TaskEvent) -> Self {
        match event {
            TaskEvent::Queued { task_id, queue_position, estimated_wait_minutes } => Self {
                kind: "task_queued",
                data: json!({
                    "task_id": task_id,
                    "queue_position": queue_position,
                    "estimated_wait_minutes": estimated_wait_minutes,
                    "message": format!("position {queue_position} in queue"),
                }),
            },
            TaskEvent::Progress { task_id, percent, status, detail } => Self {
                kind: "task_progress",
                data: json!({
                    "task_id": task_id,
                    "percent": percent,
                    "status": status.to_string(),
                    "detail": detail,
                }),
            },
            TaskEvent::Complete { task_id, format, file_name, file_hash, payload } => {
                let _ = format;
                let mut data: Value = serde_json::from_str(payload).unwrap_or_else(|_| json!({}));
                if let Value::Object(map) = &mut data {
                    map.entry("task_id").or_insert_with(|| json!(task_id));
                    map.entry("file_name").or_insert_with(|| json!(file_name));
                    map.entry("file_hash").or_insert_with(|| json!(file_hash));
                }
                Self { kind: "task_complete", data }
            }
            TaskEvent::Failed { task_id, code, message } => Self {
                kind: "task_progress",
                data: json!({
                    "task_id": task_id,
                    "status": TaskStatus::Failed.to_string(),
                    "code": code,
                    "message": message,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_envelope_parses_upload_request() {
        let raw = json!({
            "type": "upload_request",
            "data": {
                "file_name": "a.wav",
                "file_size": 100,
                "file_hash": "deadbeef",
            }
        });
        let envelope: InboundEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.kind, "upload_request");
        let data: UploadRequestData = serde_json::from_value(envelope.data).unwrap();
        assert_eq!(data.file_name, "a.wav");
        assert!(!data.force_refresh);
        assert_eq!(data.output_format, OutputFormat::Json);
        assert_eq!(data.upload_mode, UploadMode::Single);
    }

    #[test]
    fn complete_event_merges_payload_fields() {
        let event = TaskEvent::Complete {
            task_id: Uuid::new_v4(),
            format: OutputFormat::Srt,
            file_name: "x.wav".into(),
            file_hash: "hash".into(),
            payload: json!({ "format": "srt", "content": "1\n..." }).to_string(),
        };
        let envelope = OutboundEnvelope::from_task_event(&event);
        assert_eq!(envelope.kind, "task_complete");
        assert_eq!(envelope.data["content"], "1\n...");
        assert_eq!(envelope.data["format"], "srt");
    }
}
