use std::path::Path;
use std::sync::{Arc, Mutex};

use domain::error::TaskError;
use domain::model::entity::RawResult;
use domain::service::{TranscribeHints, TranscriptionEngine};
use tokio::sync::Semaphore;

/// A fixed pool of `N` non-reentrant engine instances (§4.5,
/// `engine.pool_size > 1`). A semaphore caps concurrent callers at `N`; each
/// permit holder claims whichever pooled instance is free rather than being
/// pinned to one slot, so a slow transcription on instance 0 doesn't starve
/// callers who'd otherwise be waiting on it specifically.
pub struct PooledEngine<F> {
    instances: Vec<Arc<Mutex<F>>>,
    free: Arc<Mutex<Vec<usize>>>,
    permits: Semaphore,
}

impl<F> PooledEngine<F>
where
    F: FnMut(&Path, &TranscribeHints) -> Result<RawResult, TaskError> + Send + 'static,
{
    pub fn new(instances: Vec<F>) -> Self {
        let count = instances.len();
        assert!(count > 0, "engine pool must contain at least one instance");
        Self {
            free: Arc::new(Mutex::new((0..count).collect())),
            instances: instances.into_iter().map(|f| Arc::new(Mutex::new(f))).collect(),
            permits: Semaphore::new(count),
        }
    }
}

#[async_trait::async_trait]
impl<F> TranscriptionEngine for PooledEngine<F>
where
    F: FnMut(&Path, &TranscribeHints) -> Result<RawResult, TaskError> + Send + 'static,
{
    async fn transcribe(&self, path: &Path, hints: &TranscribeHints) -> Result<RawResult, TaskError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("engine pool semaphore is never closed");

        let slot = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .expect("a permit implies a free slot is available");

        let model = self.instances[slot].clone();
        let path = path.to_owned();
        let hints = hints.clone();

        let result = tokio::task::spawn_blocking(move || {
            let mut model = model.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            model(&path, &hints)
        })
        .await
        .map_err(|e| TaskError::EngineFailure(e.to_string()));

        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(slot);

        result?
    }
}
