use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use domain::error::TaskError;
use domain::model::entity::RawResult;
use domain::service::TranscribeHints;

/// Invokes the real, out-of-scope transcription engine as a subprocess, per
/// the contract in §4.5/§9: given an audio path, the configured command is
/// expected to print one JSON object matching [`RawResult`] on stdout, or
/// write a human-readable failure to stderr and exit non-zero.
///
/// This is the one concrete adapter the core ships with for the engine
/// boundary the spec otherwise treats as an opaque collaborator — it knows
/// nothing about speech recognition, only about shelling out and
/// classifying the result. It does not itself serialize calls: that's
/// [`SerializedEngine`](super::serialized::SerializedEngine) or
/// [`PooledEngine`](super::pooled::PooledEngine)'s job, matching whichever
/// concurrency discipline the real engine needs.
#[derive(Clone)]
pub struct ProcessEngineInvoker {
    command: Arc<str>,
}

impl ProcessEngineInvoker {
    pub fn new(command: impl Into<Arc<str>>) -> Self {
        Self { command: command.into() }
    }

    /// Runs synchronously; callers always invoke this from inside
    /// `spawn_blocking` (via `SerializedEngine`/`PooledEngine`), so blocking
    /// the calling thread on process I/O is expected.
    pub fn invoke(&self, path: &Path, hints: &TranscribeHints) -> Result<RawResult, TaskError> {
        let mut cmd = std::process::Command::new(&*self.command);
        cmd.arg(path);
        if let Some(language) = &hints.language {
            cmd.arg("--language").arg(language);
        }

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| TaskError::EngineFailure(format!("failed to spawn engine process: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_process_failure(&stderr));
        }

        serde_json::from_slice::<RawResult>(&output.stdout)
            .map_err(|e| TaskError::EngineFailure(format!("malformed engine output: {e}")))
    }
}

/// Markers the real engine (a VAD-plus-ASR pipeline) is documented to raise
/// for transient faults, vs. everything else treated as permanent. Matches
/// the spec's §7 example ("VAD-internal index faults, transient model
/// errors") and scenario 5's "VAD index out of range" wording.
fn classify_process_failure(stderr: &str) -> TaskError {
    const TRANSIENT_MARKERS: [&str; 3] =
        ["index out of range", "cuda out of memory", "temporarily unavailable"];
    let lower = stderr.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        TaskError::EngineTransient(stderr.trim().to_owned())
    } else {
        TaskError::EngineFailure(stderr.trim().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_vad_index_errors_as_transient() {
        assert!(matches!(
            classify_process_failure("VAD index out of range at frame 12"),
            TaskError::EngineTransient(_)
        ));
    }

    #[test]
    fn classifies_unknown_errors_as_permanent() {
        assert!(matches!(
            classify_process_failure("unsupported codec"),
            TaskError::EngineFailure(_)
        ));
    }
}
