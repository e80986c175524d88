use std::path::PathBuf;

use crate::error::BlobError;
use crate::model::entity::BlobStat;

/// An in-progress upload reserved by [`BlobStore::begin_upload`]. Opaque to
/// callers beyond the fields they need to address chunk writes.
#[derive(Debug, Clone)]
pub struct UploadHandle {
    pub hash: String,
    pub temp_path: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct FinalizeOutcome {
    pub hash_ok: bool,
}

/// Content-addressed file storage with reference counting. See §4.3: writes
/// are idempotent, atomic at `finalize`, and all mutating operations on a
/// given hash are serialized.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn begin_upload(&self, hash: &str, size: u64) -> Result<UploadHandle, BlobError>;

    async fn write_chunk(
        &self,
        handle: &UploadHandle,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), BlobError>;

    /// Verifies the assembled bytes hash to `handle.hash` and atomically
    /// renames the temp file into the content-addressed layout. Concurrent
    /// finalizes of the same hash each win or lose the rename independently;
    /// losers discard their temp file without error.
    async fn finalize(&self, handle: UploadHandle) -> Result<FinalizeOutcome, BlobError>;

    /// +1 refcount and return the served path. Fails with `NotFound` if no
    /// blob exists for this hash.
    async fn acquire(&self, hash: &str) -> Result<PathBuf, BlobError>;

    /// -1 refcount; schedules deletion once it reaches zero, per policy.
    async fn release(&self, hash: &str) -> Result<(), BlobError>;

    async fn stat(&self, hash: &str) -> Result<BlobStat, BlobError>;
}
