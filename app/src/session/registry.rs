use std::sync::Arc;

use dashmap::DashMap;
use domain::model::entity::{Session, SessionId};
use domain::service::{TaskEvent, TaskEventSink};
use tokio::sync::{mpsc, Mutex};

use crate::protocol::message::OutboundEnvelope;

/// A single live connection's outbound side plus its domain session state.
/// The bounded `outbound_tx` *is* the per-session queue from §4.2's
/// backpressure rule: non-terminal events are `try_send`, terminal events
/// are awaited so they are only ever lost if the session is already gone.
pub struct SessionHandle {
    pub state: Mutex<Session>,
    pub outbound_tx: mpsc::Sender<String>,
}

/// Registry of live sessions. Doubles as the task manager's fan-out
/// boundary (`TaskEventSink`): the manager only ever knows opaque
/// `SessionId`s, never the connection itself (spec §9, "cyclic references").
/// The shape — one bounded channel per logical recipient, looked up by id —
/// generalizes the teacher's per-consumer `flume` senders
/// (`app/src/background_service/file_upload_runner.rs`'s `UploadSender`)
/// from one fixed background worker to an arbitrary, churning set of
/// WebSocket connections.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    queue_capacity: usize,
}

impl SessionRegistry {
    pub fn new(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self { sessions: DashMap::new(), queue_capacity })
    }

    pub fn register(&self, connection_id: SessionId) -> (Arc<SessionHandle>, mpsc::Receiver<String>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(self.queue_capacity);
        let handle = Arc::new(SessionHandle { state: Mutex::new(Session::new(connection_id)), outbound_tx });
        self.sessions.insert(connection_id, handle.clone());
        (handle, outbound_rx)
    }

    pub fn deregister(&self, connection_id: SessionId) {
        self.sessions.remove(&connection_id);
    }

    pub fn get(&self, connection_id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&connection_id).map(|entry| entry.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait::async_trait]
impl TaskEventSink for SessionRegistry {
    async fn dispatch(&self, event: TaskEvent, recipients: &[SessionId]) {
        let is_terminal = matches!(event, TaskEvent::Complete { .. } | TaskEvent::Failed { .. });
        let text = OutboundEnvelope::from_task_event(&event).to_text();

        for session_id in recipients {
            let Some(handle) = self.sessions.get(session_id).map(|entry| entry.clone()) else {
                continue;
            };
            if is_terminal {
                // Awaited rather than `try_send`: a full queue just means the
                // writer hasn't drained yet, not that the session is gone.
                // Only a closed receiver (session already torn down) fails.
                if handle.outbound_tx.send(text.clone()).await.is_err() {
                    tracing::debug!(%session_id, "terminal event undeliverable, session already closed");
                }
            } else if handle.outbound_tx.try_send(text.clone()).is_err() {
                tracing::debug!(%session_id, "dropping non-terminal event under backpressure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::model::entity::{OutputFormat, TaskStatus};
    use uuid::Uuid;

    #[tokio::test]
    async fn terminal_events_are_delivered_even_when_queue_is_momentarily_full() {
        let registry = SessionRegistry::new(1);
        let connection_id = Uuid::new_v4();
        let (_handle, mut rx) = registry.register(connection_id);

        // Fill the one-slot queue with a non-terminal event first.
        registry
            .dispatch(
                TaskEvent::Progress { task_id: Uuid::new_v4(), percent: 0, status: TaskStatus::Processing, detail: None },
                &[connection_id],
            )
            .await;

        let task_id = Uuid::new_v4();
        let dispatch = registry.dispatch(
            TaskEvent::Complete {
                task_id,
                format: OutputFormat::Json,
                file_name: "a.wav".into(),
                file_hash: "hash".into(),
                payload: "{}".into(),
            },
            &[connection_id],
        );
        tokio::pin!(dispatch);

        // The terminal dispatch can't complete until the queue drains.
        assert!(futures::poll!(&mut dispatch).is_pending());

        let first = rx.recv().await.unwrap();
        assert!(first.contains("task_progress"));

        dispatch.await;
        let second = rx.recv().await.unwrap();
        assert!(second.contains("task_complete"));
    }

    #[tokio::test]
    async fn non_terminal_events_are_dropped_under_backpressure_not_blocked() {
        let registry = SessionRegistry::new(1);
        let connection_id = Uuid::new_v4();
        let (_handle, mut rx) = registry.register(connection_id);

        for _ in 0..3 {
            registry
                .dispatch(
                    TaskEvent::Progress { task_id: Uuid::new_v4(), percent: 0, status: TaskStatus::Processing, detail: None },
                    &[connection_id],
                )
                .await;
        }

        // Exactly one made it into the single-slot queue; the rest were dropped.
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
