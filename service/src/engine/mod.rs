//! Implementations of `domain::service::TranscriptionEngine` (§4.5). The
//! underlying model is non-reentrant, so every implementation here is
//! responsible for ensuring at most one call is in flight per model
//! instance; callers above this boundary only see a thread-safe facade.

pub mod mock;
pub mod pooled;
pub mod process;
pub mod serialized;

use std::sync::Arc;

use domain::service::TranscriptionEngine;

pub use mock::MockEngine;
pub use pooled::PooledEngine;
pub use process::ProcessEngineInvoker;
pub use serialized::SerializedEngine;

/// Builds the configured `TranscriptionEngine` facade over a subprocess
/// invocation of the real engine (§4.5, `concurrency_mode`): `"lock"` gives
/// one shared instance behind a mutex, anything else gives a pool of
/// `concurrency` independent instances, one per worker.
pub fn build_process_engine(concurrency_mode: &str, concurrency: usize, command: &str) -> Arc<dyn TranscriptionEngine> {
    let invoker = ProcessEngineInvoker::new(command.to_owned());
    if concurrency_mode.eq_ignore_ascii_case("lock") {
        Arc::new(SerializedEngine::new(move |path: &std::path::Path, hints: &domain::service::TranscribeHints| {
            invoker.invoke(path, hints)
        }))
    } else {
        let instances: Vec<_> = (0..concurrency.max(1))
            .map(|_| {
                let invoker = invoker.clone();
                move |path: &std::path::Path, hints: &domain::service::TranscribeHints| invoker.invoke(path, hints)
            })
            .collect();
        Arc::new(PooledEngine::new(instances))
    }
}
