use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use domain::error::TaskError;
use domain::model::entity::{OutputFormat, SessionId, SubmitRequest, Task, TaskId, TaskOutcome, TaskStatus};
use domain::service::{
    BeginOutcome, BlobStore, CancelOutcome, EnqueueOutcome, ResultCache, TaskEvent, TaskEventSink, TaskManager,
    TaskManagerStats, TaskSnapshot, TranscribeHints, TranscriptionEngine,
};
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::formatter::{json_merge, srt};

/// Tuning knobs the task manager is constructed with (§6, Scheduler section).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_queue_size: usize,
    pub max_concurrent: usize,
    pub retry_times: u32,
    pub task_timeout: Duration,
    pub merge_gap_ms: u64,
    /// §6's `cache_enabled`: when false, `Submit` never short-circuits on a
    /// hash match and a completed task's raw result is formatted in place
    /// rather than written through to the result cache.
    pub cache_enabled: bool,
}

struct Shared {
    registry: DashMap<TaskId, Task>,
    blob_paths: DashMap<TaskId, PathBuf>,
    queue_tx: flume::Sender<TaskId>,
    queue_rx: flume::Receiver<TaskId>,
    blob_store: Arc<dyn BlobStore>,
    result_cache: Arc<dyn ResultCache>,
    engine: Arc<dyn TranscriptionEngine>,
    event_sink: Arc<dyn TaskEventSink>,
    config: SchedulerConfig,
    recent_processing_times: Mutex<VecDeque<Duration>>,
    shutting_down: AtomicBool,
    shutdown_notify: tokio::sync::Notify,
}

/// Sole arbiter of task admission, ordering, execution, retry, and completion
/// notification (§4.1). The bounded `flume` queue plus a fixed pool of
/// `max_concurrent` worker loops spawned at construction mirrors the
/// teacher's `TaskSchedulerRunner` (`app/src/background_service/task_scheduler_runner.rs`):
/// one `recv_async` loop per worker, each dispatched job running in its own
/// instrumented spawn.
pub struct TaskManagerImpl {
    shared: Arc<Shared>,
    worker_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl TaskManagerImpl {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        result_cache: Arc<dyn ResultCache>,
        engine: Arc<dyn TranscriptionEngine>,
        event_sink: Arc<dyn TaskEventSink>,
        config: SchedulerConfig,
    ) -> Self {
        let (queue_tx, queue_rx) = flume::bounded(config.max_queue_size.max(1));
        let shared = Arc::new(Shared {
            registry: DashMap::new(),
            blob_paths: DashMap::new(),
            queue_tx,
            queue_rx,
            blob_store,
            result_cache,
            engine,
            event_sink,
            recent_processing_times: Mutex::new(VecDeque::with_capacity(20)),
            shutting_down: AtomicBool::new(false),
            shutdown_notify: tokio::sync::Notify::new(),
            config,
        });

        let mut worker_handles = Vec::with_capacity(shared.config.max_concurrent);
        for worker_id in 0..shared.config.max_concurrent {
            let shared = shared.clone();
            worker_handles.push(tokio::spawn(worker_loop(shared).instrument(tracing::info_span!("task_worker", worker_id))));
        }

        Self { shared, worker_handles: Mutex::new(worker_handles) }
    }

    async fn derive_payload(shared: &Shared, task: &Task) -> Result<String, TaskError> {
        let hash = task.file_hash.clone();
        let merge_gap_ms = shared.config.merge_gap_ms;
        match task.output_format {
            OutputFormat::Json => {
                let hash_for_derive = hash.clone();
                let derive = move |raw: &domain::model::entity::RawResult| {
                    let core = json_merge::merge(raw, &hash_for_derive, merge_gap_ms);
                    json_merge::serialize_core(&core)
                };
                let core_json = shared.result_cache.get_or_derive_format(&hash, OutputFormat::Json, &derive).await?;
                json_merge::to_completion_payload(&core_json, &task.id.to_string(), &task.file_name)
                    .map_err(|e| TaskError::EngineFailure(format!("failed to render completion payload: {e}")))
            }
            OutputFormat::Srt => {
                let derive = |raw: &domain::model::entity::RawResult| srt::convert(raw);
                let content = shared.result_cache.get_or_derive_format(&hash, OutputFormat::Srt, &derive).await?;
                Ok(srt::to_completion_payload(&content, &task.file_name, &hash))
            }
        }
    }

    /// Formats a freshly-produced raw result directly, without consulting the
    /// result cache at all (§6, `cache_enabled = false`). Used instead of
    /// [`derive_payload`] when caching is turned off: nothing is persisted, so
    /// a later request for a different format on the same hash simply
    /// re-runs the engine rather than deriving from a stored raw result.
    fn format_raw_directly(task: &Task, merge_gap_ms: u64, raw: &domain::model::entity::RawResult) -> Result<String, TaskError> {
        match task.output_format {
            OutputFormat::Json => {
                let core = json_merge::merge(raw, &task.file_hash, merge_gap_ms);
                let core_json = json_merge::serialize_core(&core);
                json_merge::to_completion_payload(&core_json, &task.id.to_string(), &task.file_name)
                    .map_err(|e| TaskError::EngineFailure(format!("failed to render completion payload: {e}")))
            }
            OutputFormat::Srt => {
                let content = srt::convert(raw);
                Ok(srt::to_completion_payload(&content, &task.file_name, &task.file_hash))
            }
        }
    }

    async fn estimated_wait_minutes(shared: &Shared, queue_position: usize) -> f64 {
        let samples = shared.recent_processing_times.lock().await;
        if samples.is_empty() || shared.config.max_concurrent == 0 {
            return 0.0;
        }
        let average_ms = samples.iter().map(|d| d.as_millis() as f64).sum::<f64>() / samples.len() as f64;
        let average_minutes = average_ms / 60_000.0;
        (queue_position as f64) * average_minutes / (shared.config.max_concurrent as f64)
    }

    async fn record_processing_time(shared: &Shared, elapsed: Duration) {
        let mut samples = shared.recent_processing_times.lock().await;
        samples.push_back(elapsed);
        if samples.len() > 20 {
            samples.pop_front();
        }
    }

    /// Process-wide teardown (§9, "Shutdown... drains workers"): lets any
    /// task already in flight run to completion, stops workers from
    /// dequeuing anything new, and waits for every worker loop to exit.
    /// Tasks still sitting in the queue are simply abandoned in place —
    /// there is no promise of draining the backlog, only of not leaving a
    /// worker mid-engine-call when the process exits.
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        self.shared.shutdown_notify.notify_waiters();
        let handles = std::mem::take(&mut *self.worker_handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[async_trait::async_trait]
impl TaskManager for TaskManagerImpl {
    async fn begin_submission(&self, req: SubmitRequest) -> Result<BeginOutcome, TaskError> {
        if self.shared.config.cache_enabled && !req.force_refresh {
            if let Some(record) = self.shared.result_cache.get(&req.file_hash).await? {
                let task_id = Uuid::new_v4();
                let payload = if let Some(payload) = record.produced_formats.get(req.output_format) {
                    payload.to_owned()
                } else {
                    let hash = req.file_hash.clone();
                    let merge_gap_ms = self.shared.config.merge_gap_ms;
                    match req.output_format {
                        OutputFormat::Json => {
                            let hash_for_derive = hash.clone();
                            let derive = move |raw: &domain::model::entity::RawResult| {
                                let core = json_merge::merge(raw, &hash_for_derive, merge_gap_ms);
                                json_merge::serialize_core(&core)
                            };
                            self.shared.result_cache.get_or_derive_format(&hash, req.output_format, &derive).await?
                        }
                        OutputFormat::Srt => {
                            let derive = |raw: &domain::model::entity::RawResult| srt::convert(raw);
                            self.shared.result_cache.get_or_derive_format(&hash, req.output_format, &derive).await?
                        }
                    }
                };
                let payload = match req.output_format {
                    OutputFormat::Json => json_merge::to_completion_payload(&payload, &task_id.to_string(), &req.file_name)
                        .map_err(|e| TaskError::EngineFailure(e.to_string()))?,
                    OutputFormat::Srt => srt::to_completion_payload(&payload, &req.file_name, &req.file_hash),
                };

                tracing::debug!(file_hash = %req.file_hash, "cache hit, bypassing queue");
                return Ok(BeginOutcome::CacheHit {
                    task_id,
                    format: req.output_format,
                    file_name: req.file_name,
                    file_hash: req.file_hash,
                    payload,
                });
            }
        }

        let task_id = Uuid::new_v4();
        let task = Task::new(
            task_id,
            req.file_hash,
            req.file_name,
            req.file_size,
            req.output_format,
            req.creator_session_id,
        );
        self.shared.registry.insert(task_id, task);
        Ok(BeginOutcome::PendingUpload { task_id })
    }

    async fn blob_ready(&self, task_id: TaskId) -> Result<EnqueueOutcome, TaskError> {
        let file_hash = self
            .shared
            .registry
            .get(&task_id)
            .map(|t| t.file_hash.clone())
            .ok_or(TaskError::UnknownTask)?;

        // §4.1's admission gate is "pending + processing ≥ max_queue_size", not
        // "the channel is full": processing tasks have already been pulled out
        // of `queue_tx` by a worker, so channel fullness alone under-rejects by
        // up to `max_concurrent`. Count every other task still pending or
        // processing before offering this one to the queue.
        let active = self
            .shared
            .registry
            .iter()
            .filter(|entry| *entry.key() != task_id)
            .filter(|entry| matches!(entry.status, TaskStatus::Pending | TaskStatus::Processing))
            .count();
        if active >= self.shared.config.max_queue_size {
            self.shared.registry.remove(&task_id);
            self.shared.blob_paths.remove(&task_id);
            return Err(TaskError::QueueFull);
        }

        let path = self.shared.blob_store.acquire(&file_hash).await?;
        self.shared.blob_paths.insert(task_id, path);

        match self.shared.queue_tx.try_send(task_id) {
            Ok(()) => {
                let queue_position = self.shared.queue_tx.len();
                if queue_position <= 1 {
                    Ok(EnqueueOutcome::Immediate)
                } else {
                    let estimated_wait_minutes = Self::estimated_wait_minutes(&self.shared, queue_position).await;
                    self.shared
                        .event_sink
                        .dispatch(
                            TaskEvent::Queued { task_id, queue_position, estimated_wait_minutes },
                            &subscribers(&self.shared, task_id),
                        )
                        .await;
                    Ok(EnqueueOutcome::Queued { queue_position, estimated_wait_minutes })
                }
            }
            Err(_full_or_disconnected) => {
                self.shared.blob_paths.remove(&task_id);
                self.shared.registry.remove(&task_id);
                let _ = self.shared.blob_store.release(&file_hash).await;
                Err(TaskError::QueueFull)
            }
        }
    }

    async fn abandon(&self, task_id: TaskId) {
        self.shared.registry.remove(&task_id);
        self.shared.blob_paths.remove(&task_id);
    }

    async fn subscribe(&self, task_id: TaskId, session_id: SessionId) -> Result<(), TaskError> {
        let mut entry = self.shared.registry.get_mut(&task_id).ok_or(TaskError::UnknownTask)?;
        entry.subscriber_session_ids.insert(session_id);
        Ok(())
    }

    async fn unsubscribe(&self, task_id: TaskId, session_id: SessionId) {
        if let Some(mut entry) = self.shared.registry.get_mut(&task_id) {
            entry.subscriber_session_ids.remove(&session_id);
        }
    }

    async fn cancel(&self, task_id: TaskId, session_id: SessionId) -> Result<CancelOutcome, TaskError> {
        let mut entry = self.shared.registry.get_mut(&task_id).ok_or(TaskError::UnknownTask)?;
        if !entry.subscriber_session_ids.contains(&session_id) && entry.creator_session_id != session_id {
            return Err(TaskError::UnknownTask);
        }
        if entry.status != TaskStatus::Pending {
            return Ok(CancelOutcome::NoEffect);
        }
        entry.status = TaskStatus::Cancelled;
        entry.outcome = Some(TaskOutcome::Cancelled);
        entry.finished_at = Some(Utc::now());
        let file_hash = entry.file_hash.clone();
        drop(entry);

        if self.shared.blob_paths.remove(&task_id).is_some() {
            let _ = self.shared.blob_store.release(&file_hash).await;
        }
        Ok(CancelOutcome::Cancelled)
    }

    async fn task_snapshot(&self, task_id: TaskId) -> Result<TaskSnapshot, TaskError> {
        let entry = self.shared.registry.get(&task_id).ok_or(TaskError::UnknownTask)?;
        Ok(TaskSnapshot {
            task_id,
            status: entry.status,
            retry_count: entry.retry_count,
            created_at: entry.created_at,
            started_at: entry.started_at,
            finished_at: entry.finished_at,
            outcome: entry.outcome.clone(),
        })
    }

    async fn stats(&self) -> TaskManagerStats {
        let mut stats = TaskManagerStats {
            max_queue_size: self.shared.config.max_queue_size,
            max_concurrent: self.shared.config.max_concurrent,
            queue_size: self.shared.queue_tx.len(),
            ..Default::default()
        };
        for entry in self.shared.registry.iter() {
            match entry.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}

fn subscribers(shared: &Shared, task_id: TaskId) -> Vec<SessionId> {
    shared
        .registry
        .get(&task_id)
        .map(|t| t.subscriber_session_ids.iter().copied().collect())
        .unwrap_or_default()
}

/// One of `max_concurrent` workers pulling from the shared FIFO queue. Mirrors
/// the teacher's `TaskSchedulerRunner::run` shape: block on `recv_async`,
/// dispatch each job in its own instrumented spawn so a slow completion
/// handler never stalls the next dequeue.
async fn worker_loop(shared: Arc<Shared>) {
    loop {
        if shared.shutting_down.load(Ordering::Acquire) {
            break;
        }

        let task_id = tokio::select! {
            biased;
            _ = shared.shutdown_notify.notified() => {
                if shared.shutting_down.load(Ordering::Acquire) {
                    break;
                }
                continue;
            }
            received = shared.queue_rx.recv_async() => {
                match received {
                    Ok(task_id) => task_id,
                    Err(_disconnected) => break,
                }
            }
        };

        let shared = shared.clone();
        async move {
            if let Err(e) = run_one(&shared, task_id).await {
                tracing::error!(%task_id, error = %e, "task worker failed unexpectedly");
            }
        }
        .instrument(tracing::info_span!("task_dispatch", %task_id))
        .await;
    }
}

async fn run_one(shared: &Shared, task_id: TaskId) -> Result<(), TaskError> {
    let Some((file_hash, output_format)) = (match shared.registry.get_mut(&task_id) {
        Some(mut entry) => {
            if entry.status == TaskStatus::Cancelled {
                None
            } else {
                entry.status = TaskStatus::Processing;
                entry.started_at.get_or_insert(Utc::now());
                Some((entry.file_hash.clone(), entry.output_format))
            }
        }
        None => None,
    }) else {
        return Ok(());
    };

    shared
        .event_sink
        .dispatch(
            TaskEvent::Progress { task_id, percent: 0, status: TaskStatus::Processing, detail: None },
            &subscribers(shared, task_id),
        )
        .await;

    let Some(path) = shared.blob_paths.get(&task_id).map(|p| p.clone()) else {
        fail_task(shared, task_id, &file_hash, TaskError::UnknownTask).await;
        return Ok(());
    };

    let hints = TranscribeHints::default();
    let outcome = tokio::time::timeout(shared.config.task_timeout, shared.engine.transcribe(&path, &hints)).await;

    match outcome {
        Err(_elapsed) => {
            retry_or_fail(shared, task_id, &file_hash, TaskError::TaskTimeout).await;
        }
        Ok(Err(e)) => {
            retry_or_fail(shared, task_id, &file_hash, e).await;
        }
        Ok(Ok(raw)) => {
            complete_task(shared, task_id, &file_hash, output_format, raw).await;
        }
    }

    Ok(())
}

async fn complete_task(
    shared: &Shared,
    task_id: TaskId,
    file_hash: &str,
    output_format: OutputFormat,
    raw: domain::model::entity::RawResult,
) {
    if shared.config.cache_enabled {
        if let Err(e) = shared.result_cache.put_raw(file_hash, raw.clone()).await {
            fail_task(shared, task_id, file_hash, TaskError::Cache(e)).await;
            return;
        }
    }

    let task_snapshot = shared.registry.get(&task_id).map(|t| t.clone());
    let Some(task) = task_snapshot else { return };

    let payload = if shared.config.cache_enabled {
        TaskManagerImpl::derive_payload(shared, &task).await
    } else {
        TaskManagerImpl::format_raw_directly(&task, shared.config.merge_gap_ms, &raw)
    };
    let payload = match payload {
        Ok(payload) => payload,
        Err(e) => {
            fail_task(shared, task_id, file_hash, e).await;
            return;
        }
    };

    let started_at = task.started_at;
    if let Some(mut entry) = shared.registry.get_mut(&task_id) {
        entry.status = TaskStatus::Completed;
        entry.finished_at = Some(Utc::now());
        entry.outcome = Some(TaskOutcome::Completed { file_hash: file_hash.to_owned() });
    }

    if let Some(started_at) = started_at {
        if let Ok(elapsed) = (Utc::now() - started_at).to_std() {
            TaskManagerImpl::record_processing_time(shared, elapsed).await;
        }
    }

    let _ = shared.blob_store.release(file_hash).await;
    shared.blob_paths.remove(&task_id);

    shared
        .event_sink
        .dispatch(
            TaskEvent::Complete {
                task_id,
                format: output_format,
                file_name: task.file_name.clone(),
                file_hash: file_hash.to_owned(),
                payload,
            },
            &subscribers(shared, task_id),
        )
        .await;
}

async fn retry_or_fail(shared: &Shared, task_id: TaskId, file_hash: &str, error: TaskError) {
    let retry_count = shared.registry.get(&task_id).map(|t| t.retry_count).unwrap_or(0);
    if error.is_transient() && retry_count < shared.config.retry_times {
        if let Some(mut entry) = shared.registry.get_mut(&task_id) {
            entry.retry_count += 1;
            entry.status = TaskStatus::Pending;
        }
        shared
            .event_sink
            .dispatch(
                TaskEvent::Progress {
                    task_id,
                    percent: 0,
                    status: TaskStatus::Pending,
                    detail: Some(error.to_string()),
                },
                &subscribers(shared, task_id),
            )
            .await;

        // Appended at the tail, preserving FIFO fairness across retries (§4.1).
        if shared.queue_tx.send_async(task_id).await.is_err() {
            fail_task(shared, task_id, file_hash, TaskError::QueueFull).await;
        }
    } else {
        fail_task(shared, task_id, file_hash, error).await;
    }
}

async fn fail_task(shared: &Shared, task_id: TaskId, file_hash: &str, error: TaskError) {
    if let Some(mut entry) = shared.registry.get_mut(&task_id) {
        entry.status = TaskStatus::Failed;
        entry.finished_at = Some(Utc::now());
        entry.outcome = Some(TaskOutcome::Failed { code: error.code().to_owned(), message: error.to_string() });
    }
    let _ = shared.blob_store.release(file_hash).await;
    shared.blob_paths.remove(&task_id);

    shared
        .event_sink
        .dispatch(
            TaskEvent::Failed { task_id, code: error.code().to_owned(), message: error.to_string() },
            &subscribers(shared, task_id),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::FsBlobStore;
    use crate::engine::mock::{MockEngine, MockOutcome};
    use crate::result_cache::SledResultCache;
    use domain::model::entity::{RawResult, RawSentence};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    struct RecordingSink {
        events: StdMutex<Vec<TaskEvent>>,
        terminal_tx: mpsc::UnboundedSender<()>,
    }

    impl RecordingSink {
        /// The returned receiver buffers one signal per terminal event, so a
        /// test awaiting it after triggering work can never race a dispatch
        /// that already happened (unlike `Notify::notify_waiters`).
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
            let (terminal_tx, terminal_rx) = mpsc::unbounded_channel();
            (Arc::new(Self { events: StdMutex::new(Vec::new()), terminal_tx }), terminal_rx)
        }
    }

    #[async_trait::async_trait]
    impl TaskEventSink for RecordingSink {
        async fn dispatch(&self, event: TaskEvent, _recipients: &[SessionId]) {
            let is_terminal = matches!(event, TaskEvent::Complete { .. } | TaskEvent::Failed { .. });
            self.events.lock().unwrap().push(event);
            if is_terminal {
                let _ = self.terminal_tx.send(());
            }
        }
    }

    async fn new_manager(
        engine: Arc<dyn TranscriptionEngine>,
        sink: Arc<RecordingSink>,
        config: SchedulerConfig,
    ) -> (TaskManagerImpl, Arc<FsBlobStore>, Arc<SledResultCache>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let blob_store = Arc::new(FsBlobStore::new(dir.path().join("blobs"), false).await.unwrap());
        let cache = SledResultCache::open(dir.path().join("cache"), Duration::from_secs(3600)).unwrap();
        let manager = TaskManagerImpl::new(blob_store.clone(), cache.clone(), engine, sink, config);
        (manager, blob_store, cache, dir)
    }

    async fn upload_fixture(blob_store: &FsBlobStore, bytes: &[u8]) -> String {
        let hash = blake3::hash(bytes).to_hex().to_string();
        let handle = blob_store.begin_upload(&hash, bytes.len() as u64).await.unwrap();
        blob_store.write_chunk(&handle, 0, bytes).await.unwrap();
        let outcome = blob_store.finalize(handle).await.unwrap();
        assert!(outcome.hash_ok);
        hash
    }

    #[tokio::test]
    async fn queue_full_rejects_and_does_not_register_a_task() {
        let (sink, _terminal_rx) = RecordingSink::new();
        let config = SchedulerConfig {
            max_queue_size: 1,
            max_concurrent: 0, // no workers drain the queue, forcing it to fill up
            retry_times: 0,
            task_timeout: Duration::from_secs(5),
            merge_gap_ms: 3000,
            cache_enabled: true,
        };
        let (manager, blob_store, _cache, _dir) =
            new_manager(Arc::new(MockEngine::always_succeeds_with("x")), sink, config).await;

        let hash_a = upload_fixture(&blob_store, b"file a").await;
        let req_a = SubmitRequest {
            file_name: "a.wav".into(),
            file_size: 6,
            file_hash: hash_a,
            output_format: OutputFormat::Json,
            force_refresh: false,
            creator_session_id: Uuid::new_v4(),
        };
        let BeginOutcome::PendingUpload { task_id: id_a } = manager.begin_submission(req_a).await.unwrap() else {
            panic!("expected pending upload");
        };
        assert!(matches!(manager.blob_ready(id_a).await.unwrap(), EnqueueOutcome::Immediate));

        let hash_b = upload_fixture(&blob_store, b"file b").await;
        let req_b = SubmitRequest {
            file_name: "b.wav".into(),
            file_size: 6,
            file_hash: hash_b,
            output_format: OutputFormat::Json,
            force_refresh: false,
            creator_session_id: Uuid::new_v4(),
        };
        let BeginOutcome::PendingUpload { task_id: id_b } = manager.begin_submission(req_b).await.unwrap() else {
            panic!("expected pending upload");
        };
        let err = manager.blob_ready(id_b).await.unwrap_err();
        assert!(matches!(err, TaskError::QueueFull));
        assert!(manager.subscribe(id_b, Uuid::new_v4()).await.is_err());
    }

    /// Engine stand-in that blocks until released, so a test can hold a task
    /// in `Processing` deterministically rather than racing a fast mock.
    struct HoldEngine {
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl TranscriptionEngine for HoldEngine {
        async fn transcribe(&self, _path: &std::path::Path, _hints: &TranscribeHints) -> Result<RawResult, TaskError> {
            self.release.notified().await;
            Ok(RawResult { sentences: vec![], duration_ms: 0, processing_time_ms: 0 })
        }
    }

    /// The deterministic failure case from the admission-gate review: with
    /// `max_queue_size == max_concurrent == 1`, a task that has already been
    /// dequeued into `Processing` must still count against the cap, even
    /// though it no longer occupies a slot in the bounded channel.
    #[tokio::test]
    async fn a_processing_task_still_counts_against_max_queue_size() {
        let (sink, _terminal_rx) = RecordingSink::new();
        let config = SchedulerConfig {
            max_queue_size: 1,
            max_concurrent: 1,
            retry_times: 0,
            task_timeout: Duration::from_secs(5),
            merge_gap_ms: 3000,
            cache_enabled: true,
        };
        let engine = Arc::new(HoldEngine { release: tokio::sync::Notify::new() });
        let (manager, blob_store, _cache, _dir) = new_manager(engine.clone(), sink, config).await;

        let hash_a = upload_fixture(&blob_store, b"file a").await;
        let req_a = SubmitRequest {
            file_name: "a.wav".into(),
            file_size: 6,
            file_hash: hash_a,
            output_format: OutputFormat::Json,
            force_refresh: false,
            creator_session_id: Uuid::new_v4(),
        };
        let BeginOutcome::PendingUpload { task_id: id_a } = manager.begin_submission(req_a).await.unwrap() else {
            panic!("expected pending upload");
        };
        manager.blob_ready(id_a).await.unwrap();

        // Wait for the single worker to dequeue A, freeing up the channel
        // slot that the old (channel-fullness-only) gate relied on.
        for _ in 0..200 {
            if manager.task_snapshot(id_a).await.unwrap().status == TaskStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.task_snapshot(id_a).await.unwrap().status, TaskStatus::Processing);

        let hash_b = upload_fixture(&blob_store, b"file b").await;
        let req_b = SubmitRequest {
            file_name: "b.wav".into(),
            file_size: 6,
            file_hash: hash_b,
            output_format: OutputFormat::Json,
            force_refresh: false,
            creator_session_id: Uuid::new_v4(),
        };
        let BeginOutcome::PendingUpload { task_id: id_b } = manager.begin_submission(req_b).await.unwrap() else {
            panic!("expected pending upload");
        };
        let err = manager.blob_ready(id_b).await.unwrap_err();
        assert!(matches!(err, TaskError::QueueFull));

        engine.release.notify_one();
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_without_touching_the_queue() {
        let (sink, _terminal_rx) = RecordingSink::new();
        let config = SchedulerConfig {
            max_queue_size: 4,
            max_concurrent: 1,
            retry_times: 2,
            task_timeout: Duration::from_secs(5),
            merge_gap_ms: 3000,
            cache_enabled: true,
        };
        let (manager, blob_store, cache, _dir) =
            new_manager(Arc::new(MockEngine::always_succeeds_with("hello")), sink, config).await;

        let hash = upload_fixture(&blob_store, b"shared file").await;
        cache
            .put_raw(
                &hash,
                RawResult {
                    sentences: vec![RawSentence { text: "hi".into(), start_ms: 0, end_ms: 500, speaker_id: 0 }],
                    duration_ms: 500,
                    processing_time_ms: 1,
                },
            )
            .await
            .unwrap();

        let req = SubmitRequest {
            file_name: "shared.wav".into(),
            file_size: 11,
            file_hash: hash,
            output_format: OutputFormat::Json,
            force_refresh: false,
            creator_session_id: Uuid::new_v4(),
        };
        let outcome = manager.begin_submission(req).await.unwrap();
        assert!(matches!(outcome, BeginOutcome::CacheHit { .. }));
        let stats = manager.stats().await;
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 0);
        let _ = blob_store;
    }

    #[tokio::test]
    async fn transient_failure_retries_then_completes() {
        let (sink, mut terminal_rx) = RecordingSink::new();
        let config = SchedulerConfig {
            max_queue_size: 4,
            max_concurrent: 1,
            retry_times: 2,
            task_timeout: Duration::from_secs(5),
            merge_gap_ms: 3000,
            cache_enabled: true,
        };
        let engine = Arc::new(MockEngine::new(vec![
            MockOutcome::Transient("vad index out of range".into()),
            MockOutcome::Success(RawResult {
                sentences: vec![RawSentence { text: "ok".into(), start_ms: 0, end_ms: 100, speaker_id: 0 }],
                duration_ms: 100,
                processing_time_ms: 1,
            }),
        ]));
        let (manager, blob_store, _cache, _dir) = new_manager(engine, sink.clone(), config).await;

        let hash = upload_fixture(&blob_store, b"retry me").await;
        let req = SubmitRequest {
            file_name: "r.wav".into(),
            file_size: 8,
            file_hash: hash,
            output_format: OutputFormat::Json,
            force_refresh: false,
            creator_session_id: Uuid::new_v4(),
        };
        let BeginOutcome::PendingUpload { task_id } = manager.begin_submission(req).await.unwrap() else {
            panic!("expected pending upload");
        };
        manager.blob_ready(task_id).await.unwrap();

        terminal_rx.recv().await.expect("task reaches a terminal state");

        let events = sink.events.lock().unwrap();
        let has_retry_progress = events.iter().any(|e| {
            matches!(e, TaskEvent::Progress { status: TaskStatus::Pending, detail: Some(_), .. })
        });
        let completed = events.iter().any(|e| matches!(e, TaskEvent::Complete { .. }));
        assert!(has_retry_progress);
        assert!(completed);
    }

    #[tokio::test]
    async fn disabled_cache_never_short_circuits_and_never_persists_the_raw_result() {
        let (sink, mut terminal_rx) = RecordingSink::new();
        let config = SchedulerConfig {
            max_queue_size: 4,
            max_concurrent: 1,
            retry_times: 0,
            task_timeout: Duration::from_secs(5),
            merge_gap_ms: 3000,
            cache_enabled: false,
        };
        let engine = Arc::new(MockEngine::always_succeeds_with("no cache"));
        let (manager, blob_store, cache, _dir) = new_manager(engine, sink, config).await;

        let hash = upload_fixture(&blob_store, b"uncached file").await;
        let req = SubmitRequest {
            file_name: "u.wav".into(),
            file_size: 13,
            file_hash: hash.clone(),
            output_format: OutputFormat::Json,
            force_refresh: false,
            creator_session_id: Uuid::new_v4(),
        };
        let BeginOutcome::PendingUpload { task_id } = manager.begin_submission(req).await.unwrap() else {
            panic!("expected pending upload even though this hash was already uploaded above");
        };
        manager.blob_ready(task_id).await.unwrap();
        terminal_rx.recv().await.expect("task reaches a terminal state");

        assert!(cache.get(&hash).await.unwrap().is_none(), "raw result must not be written through when caching is off");

        // A second submission of the same hash must run the engine again
        // rather than short-circuiting on a (nonexistent) cache entry.
        let req2 = SubmitRequest {
            file_name: "u.wav".into(),
            file_size: 13,
            file_hash: hash,
            output_format: OutputFormat::Json,
            force_refresh: false,
            creator_session_id: Uuid::new_v4(),
        };
        assert!(matches!(manager.begin_submission(req2).await.unwrap(), BeginOutcome::PendingUpload { .. }));
    }
}
