//! Error taxonomy for the orchestration core.
//!
//! Every variant maps to a wire-visible `code` string (see the session layer's
//! `error { code, message, task_id? }` envelope) and to a retry classification
//! consulted by the task manager's worker loop.

/// Permanent vs. transient classification used by the worker loop to decide
/// retry-vs-fail, generalized from the teacher's `RetryableStrategy::handle`
/// (`app/src/infrastructure/http/middleware/retry.rs`) from HTTP responses to
/// engine outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Permanent,
    Transient,
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("unsupported output format or file extension: {0}")]
    UnsupportedFormat(String),

    #[error("file too large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("assembled file hash does not match the declared hash")]
    FileHashMismatch,

    #[error("audio is too short to transcribe")]
    AudioTooShort,

    #[error("authentication failed")]
    AuthFailed,

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("unknown task")]
    UnknownTask,

    #[error("task queue is full")]
    QueueFull,

    #[error("maximum connections reached")]
    MaxConnections,

    #[error("task timed out")]
    TaskTimeout,

    #[error("transient engine error: {0}")]
    EngineTransient(String),

    #[error("permanent engine error: {0}")]
    EngineFailure(String),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl TaskError {
    /// The wire-visible error code sent to clients as `error.code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat(_) => "UnsupportedFormat",
            Self::FileTooLarge { .. } => "FileTooLarge",
            Self::FileHashMismatch => "FileHashMismatch",
            Self::AudioTooShort => "AudioTooShort",
            Self::AuthFailed => "AuthFailed",
            Self::InvalidMessage(_) => "InvalidMessage",
            Self::UnknownTask => "UnknownTask",
            Self::QueueFull => "QueueFull",
            Self::MaxConnections => "MaxConnections",
            Self::TaskTimeout => "TaskTimeout",
            Self::EngineTransient(_) => "EngineTransient",
            Self::EngineFailure(_) => "EngineFailure",
            Self::Blob(_) => "BlobError",
            Self::Cache(_) => "CacheError",
        }
    }

    /// Whether the worker loop should retry (up to `retry_times`) rather than
    /// terminally fail the task.
    pub fn classification(&self) -> Classification {
        match self {
            Self::EngineTransient(_) => Classification::Transient,
            _ => Classification::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.classification() == Classification::Transient
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("no blob for this hash")]
    NotFound,

    #[error("blob hash mismatch after assembly")]
    HashMismatch,

    #[error("chunk index {index} out of range for {total} total chunks")]
    ChunkIndexOutOfRange { index: u64, total: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(String),

    #[error("failed to (de)serialize a cache record: {0}")]
    Codec(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session disconnected")]
    Disconnected,

    #[error("session timed out")]
    Timeout,

    #[error("outbound queue is full (backpressure)")]
    Backpressure,

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
