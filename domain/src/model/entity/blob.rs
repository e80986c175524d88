use chrono::{DateTime, Utc};

/// In-memory bookkeeping record backing the content-addressed blob store. The
/// path is only meaningful while `refcount > 0`.
#[derive(Debug, Clone)]
pub struct BlobHandle {
    pub hash: String,
    pub path: std::path::PathBuf,
    pub size: u64,
    pub refcount: u32,
    pub last_ref_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct BlobStat {
    pub size: u64,
    pub refcount: u32,
}
