use crate::error::CacheError;
use crate::model::entity::{CacheRecord, OutputFormat, RawResult};

/// Persistent, hash-keyed store of raw engine results plus lazily derived
/// formats. See §4.4; the key invariant is that `get_or_derive_format` runs
/// its derive closure at most once per `(hash, format)` across concurrent
/// callers (single-flight).
#[async_trait::async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, hash: &str) -> Result<Option<CacheRecord>, CacheError>;

    /// Idempotent: the first writer for a given hash wins; later calls only
    /// refresh `last_access_at`.
    async fn put_raw(&self, hash: &str, raw: RawResult) -> Result<(), CacheError>;

    /// Returns the cached derived payload for `(hash, format)`, computing and
    /// caching it via `derive` if absent. `derive` is pure and synchronous —
    /// the formatter functions never perform I/O.
    async fn get_or_derive_format(
        &self,
        hash: &str,
        format: OutputFormat,
        derive: &(dyn Fn(&RawResult) -> String + Send + Sync),
    ) -> Result<String, CacheError>;

    async fn evict(&self, hash: &str) -> Result<(), CacheError>;
}
