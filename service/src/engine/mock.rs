use std::path::Path;
use std::sync::Mutex;

use domain::error::TaskError;
use domain::model::entity::{RawResult, RawSentence};
use domain::service::{TranscribeHints, TranscriptionEngine};

/// A scripted stand-in for the real engine, used in tests the way the
/// teacher's `mock::mock_run_task` stands in for job execution — except the
/// scenarios here (transient-then-success, scripted per-call outcomes) need
/// more state than a `mockall::mock!` expectation chain comfortably expresses,
/// so this one is hand-rolled.
pub struct MockEngine {
    /// Outcomes to return, consumed in order; the last entry repeats once
    /// exhausted so a test can fire more calls than it bothered to script.
    script: Mutex<Vec<MockOutcome>>,
    calls: Mutex<u32>,
}

#[derive(Clone)]
pub enum MockOutcome {
    Success(RawResult),
    Transient(String),
    Permanent(String),
}

impl MockEngine {
    pub fn new(script: Vec<MockOutcome>) -> Self {
        assert!(!script.is_empty(), "mock engine needs at least one scripted outcome");
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(0),
        }
    }

    /// Convenience constructor for the common "always succeeds with this
    /// one sentence" case.
    pub fn always_succeeds_with(sentence: &str) -> Self {
        Self::new(vec![MockOutcome::Success(RawResult {
            sentences: vec![RawSentence {
                text: sentence.to_owned(),
                start_ms: 0,
                end_ms: 1000,
                speaker_id: 0,
            }],
            duration_ms: 1000,
            processing_time_ms: 1,
        })])
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl TranscriptionEngine for MockEngine {
    async fn transcribe(&self, _path: &Path, _hints: &TranscribeHints) -> Result<RawResult, TaskError> {
        let outcome = {
            let mut calls = self.calls.lock().unwrap();
            let mut script = self.script.lock().unwrap();
            let index = (*calls as usize).min(script.len() - 1);
            *calls += 1;
            script[index].clone()
        };

        match outcome {
            MockOutcome::Success(raw) => Ok(raw),
            MockOutcome::Transient(msg) => Err(TaskError::EngineTransient(msg)),
            MockOutcome::Permanent(msg) => Err(TaskError::EngineFailure(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_scripted_outcomes_in_order_then_repeats_last() {
        let engine = MockEngine::new(vec![
            MockOutcome::Transient("overloaded".into()),
            MockOutcome::Success(RawResult {
                sentences: vec![],
                duration_ms: 0,
                processing_time_ms: 0,
            }),
        ]);

        let hints = TranscribeHints::default();
        let path = Path::new("/tmp/x.wav");

        let first = engine.transcribe(path, &hints).await;
        assert!(matches!(first, Err(TaskError::EngineTransient(_))));

        let second = engine.transcribe(path, &hints).await;
        assert!(second.is_ok());

        let third = engine.transcribe(path, &hints).await;
        assert!(third.is_ok());
        assert_eq!(engine.call_count(), 3);
    }
}
