use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use domain::error::CacheError;
use domain::model::entity::{CacheRecord, OutputFormat, RawResult};
use domain::service::ResultCache;
use infrastructure::sync::timer;
use tokio::sync::Mutex;
use tracing::Instrument;

/// Durable, hash-keyed store of raw engine results plus lazily derived
/// formats (§4.4), backed by `sled` rather than the teacher's flat
/// JSON-file dump (`app/src/infrastructure/database/json.rs`) because
/// entries here are looked up randomly by hash instead of scanned wholesale
/// — see DESIGN.md.
pub struct SledResultCache {
    db: sled::Db,
    ttl: Duration,
    derive_locks: DashMap<(String, OutputFormat), Arc<Mutex<()>>>,
}

impl SledResultCache {
    pub fn open(path: impl AsRef<std::path::Path>, ttl: Duration) -> Result<Arc<Self>, CacheError> {
        let db = sled::open(path).map_err(|e| CacheError::Storage(e.to_string()))?;
        let this = Arc::new(Self {
            db,
            ttl,
            derive_locks: DashMap::new(),
        });
        this.clone().spawn_sweeper();
        Ok(this)
    }

    fn spawn_sweeper(self: Arc<Self>) {
        tokio::spawn(
            async move {
                timer::new(Duration::from_secs(60), || {
                    let this = self.clone();
                    async move {
                        this.sweep();
                        std::ops::ControlFlow::<()>::Continue(())
                    }
                })
                .await
            }
            .instrument(tracing::trace_span!("result_cache_sweeper")),
        );
    }

    fn sweep(&self) {
        let now = Utc::now();
        let mut expired = Vec::new();
        for item in self.db.iter() {
            let Ok((key, value)) = item else { continue };
            let Ok(record) = bincode::deserialize::<CacheRecord>(&value) else { continue };
            if (now - record.last_access_at).to_std().unwrap_or(Duration::ZERO) > self.ttl {
                expired.push(key.to_vec());
            }
        }
        for key in expired {
            let _ = self.db.remove(key);
        }
        if let Err(e) = self.db.flush() {
            tracing::warn!("result cache flush failed: {e}");
        }
    }

    fn read(&self, hash: &str) -> Result<Option<CacheRecord>, CacheError> {
        match self.db.get(hash).map_err(|e| CacheError::Storage(e.to_string()))? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| CacheError::Codec(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn write(&self, hash: &str, record: &CacheRecord) -> Result<(), CacheError> {
        let bytes = bincode::serialize(record).map_err(|e| CacheError::Codec(e.to_string()))?;
        self.db.insert(hash, bytes).map_err(|e| CacheError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Flushes pending writes to disk. Called from `main`'s shutdown path
    /// (§9, "Shutdown... flushes the cache") so a clean exit never loses the
    /// last few `put_raw`/derive writes `sled`'s own background flush hasn't
    /// gotten to yet.
    pub fn flush(&self) -> Result<(), CacheError> {
        self.db.flush().map_err(|e| CacheError::Storage(e.to_string())).map(|_| ())
    }
}

#[async_trait::async_trait]
impl ResultCache for SledResultCache {
    async fn get(&self, hash: &str) -> Result<Option<CacheRecord>, CacheError> {
        let hash = hash.to_owned();
        let mut record = match self.read(&hash)? {
            Some(r) => r,
            None => return Ok(None),
        };
        record.last_access_at = Utc::now();
        self.write(&hash, &record)?;
        Ok(Some(record))
    }

    async fn put_raw(&self, hash: &str, raw: RawResult) -> Result<(), CacheError> {
        if let Some(mut existing) = self.read(hash)? {
            existing.last_access_at = Utc::now();
            return self.write(hash, &existing);
        }
        self.write(hash, &CacheRecord::new(raw))
    }

    async fn get_or_derive_format(
        &self,
        hash: &str,
        format: OutputFormat,
        derive: &(dyn Fn(&RawResult) -> String + Send + Sync),
    ) -> Result<String, CacheError> {
        let lock = self
            .derive_locks
            .entry((hash.to_owned(), format))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let mut record = self.read(hash)?.ok_or_else(|| CacheError::Storage("no raw result for hash".into()))?;
        if let Some(payload) = record.produced_formats.get(format) {
            return Ok(payload.to_owned());
        }

        let payload = derive(&record.raw);
        record.produced_formats.set(format, payload.clone());
        record.last_access_at = Utc::now();
        self.write(hash, &record)?;
        Ok(payload)
    }

    async fn evict(&self, hash: &str) -> Result<(), CacheError> {
        self.db.remove(hash).map_err(|e| CacheError::Storage(e.to_string()))?;
        Ok(())
    }
}
