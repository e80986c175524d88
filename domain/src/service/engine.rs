use std::path::Path;

use crate::error::TaskError;
use crate::model::entity::RawResult;

/// Hints passed through to the engine unmodified (e.g. language hints); the
/// core treats this as opaque configuration for the black-box model.
#[derive(Debug, Clone, Default)]
pub struct TranscribeHints {
    pub language: Option<String>,
}

/// The thread-safe facade over the non-reentrant transcription engine. Both
/// the serialized (single mutex) and pooled (N instances) implementations in
/// the `service` crate satisfy this trait; callers above this boundary never
/// need to know which one is configured.
#[async_trait::async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn transcribe(&self, path: &Path, hints: &TranscribeHints) -> Result<RawResult, TaskError>;
}
