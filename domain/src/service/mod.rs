mod blob_store;
mod engine;
mod event_sink;
mod result_cache;
mod task_manager;

#[rustfmt::skip]
pub use self::{
    blob_store::{BlobStore, FinalizeOutcome, UploadHandle},
    engine::{TranscribeHints, TranscriptionEngine},
    event_sink::{TaskEvent, TaskEventSink},
    result_cache::ResultCache,
    task_manager::{
        BeginOutcome, CancelOutcome, EnqueueOutcome, TaskManager, TaskManagerStats, TaskSnapshot,
    },
};
