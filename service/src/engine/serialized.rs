use std::path::Path;
use std::sync::{Arc, Mutex};

use domain::error::TaskError;
use domain::model::entity::RawResult;
use domain::service::{TranscribeHints, TranscriptionEngine};

/// A single engine instance guarded by one lock. Correct for a model that
/// cannot be reentered at all; every call waits for the previous one to
/// finish before the model is touched (§4.5, `engine.pool_size = 1`).
///
/// The lock is a blocking `std::sync::Mutex` rather than `tokio::sync::Mutex`
/// because it is only ever held from inside `spawn_blocking`, where blocking
/// the worker thread is expected and an async-aware lock would buy nothing.
pub struct SerializedEngine<F> {
    model: Arc<Mutex<F>>,
}

impl<F> SerializedEngine<F>
where
    F: FnMut(&Path, &TranscribeHints) -> Result<RawResult, TaskError> + Send + 'static,
{
    pub fn new(model: F) -> Self {
        Self { model: Arc::new(Mutex::new(model)) }
    }
}

#[async_trait::async_trait]
impl<F> TranscriptionEngine for SerializedEngine<F>
where
    F: FnMut(&Path, &TranscribeHints) -> Result<RawResult, TaskError> + Send + 'static,
{
    async fn transcribe(&self, path: &Path, hints: &TranscribeHints) -> Result<RawResult, TaskError> {
        let model = self.model.clone();
        let path = path.to_owned();
        let hints = hints.clone();

        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            model(&path, &hints)
        })
        .await
        .map_err(|e| TaskError::EngineFailure(e.to_string()))?
    }
}
