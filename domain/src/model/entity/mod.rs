pub mod blob;
pub mod cache;
pub mod session;
pub mod task;

#[rustfmt::skip]
pub use self::{
    blob::{BlobHandle, BlobStat},
    cache::{CacheRecord, RawResult, RawSentence},
    session::{PendingUpload, Session},
    task::{OutputFormat, SubmitRequest, Task, TaskId, TaskOutcome, TaskStatus},
};

pub type SessionId = uuid::Uuid;
