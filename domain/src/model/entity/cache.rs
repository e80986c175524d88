use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::OutputFormat;

/// One sentence as produced by the transcription engine: the unit the
/// formatter either merges (JSON) or emits one-for-one (SRT).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSentence {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub speaker_id: u32,
}

/// The untransformed engine output: an ordered sentence list plus whatever
/// timing metadata the formatter needs. Immutable once written to the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResult {
    pub sentences: Vec<RawSentence>,
    pub duration_ms: u64,
    pub processing_time_ms: u64,
}

/// Lazily-populated derived-format slots. A plain two-field struct rather
/// than a `HashMap<OutputFormat, _>` since the format set is closed and small,
/// and it keeps (de)serialization to `sled`/`bincode` straightforward.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivedFormats {
    pub json: Option<String>,
    pub srt: Option<String>,
}

impl DerivedFormats {
    pub fn get(&self, format: OutputFormat) -> Option<&str> {
        match format {
            OutputFormat::Json => self.json.as_deref(),
            OutputFormat::Srt => self.srt.as_deref(),
        }
    }

    pub fn set(&mut self, format: OutputFormat, payload: String) {
        match format {
            OutputFormat::Json => self.json = Some(payload),
            OutputFormat::Srt => self.srt = Some(payload),
        }
    }
}

/// The durable cache entry: the raw result plus whatever derived formats have
/// been computed so far. Stored in the result cache keyed by `file_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub raw: RawResult,
    pub produced_formats: DerivedFormats,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
}

impl CacheRecord {
    pub fn new(raw: RawResult) -> Self {
        let now = Utc::now();
        Self {
            raw,
            produced_formats: DerivedFormats::default(),
            created_at: now,
            last_access_at: now,
        }
    }
}
