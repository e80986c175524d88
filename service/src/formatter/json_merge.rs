use domain::model::entity::RawResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A merged transcript segment — one or more adjacent same-speaker raw
/// sentences folded together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSummary {
    pub total_speakers: usize,
    pub total_segments: usize,
    pub full_text: String,
}

/// Everything about a JSON-merged transcript that depends only on the
/// content hash, not on which task requested it. `task_id` and `file_name`
/// are request-specific and are stitched in later by
/// [`to_completion_payload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedCore {
    pub file_hash: String,
    pub duration: f64,
    pub processing_time: f64,
    pub speakers: Vec<String>,
    pub segments: Vec<Segment>,
    pub transcription_summary: TranscriptionSummary,
}

fn round3(ms: u64) -> f64 {
    ((ms as f64 / 1000.0) * 1000.0).round() / 1000.0
}

fn strip_trailing_terminal_punctuation(text: &str) -> &str {
    text.trim_end_matches(['.', '!', '?', '。', '!', '?', ',', '，'])
}

/// Merges adjacent sentences sharing a speaker where the gap between them is
/// under `merge_gap_ms`. See §4.6 for the merge rules (earliest start, latest
/// end, concatenated text, stripped interior punctuation). Single forward
/// pass, so re-merging the resulting segment list is a no-op (§8 round-trip
/// law: JSON merging is idempotent).
pub fn merge(raw: &RawResult, file_hash: &str, merge_gap_ms: u64) -> MergedCore {
    let mut speaker_labels: Vec<u32> = Vec::new();
    let mut label_for = |speaker_id: u32| -> String {
        let index = speaker_labels.iter().position(|&id| id == speaker_id).unwrap_or_else(|| {
            speaker_labels.push(speaker_id);
            speaker_labels.len() - 1
        });
        format!("Speaker{}", index + 1)
    };

    let mut segments: Vec<Segment> = Vec::new();
    for sentence in &raw.sentences {
        let label = label_for(sentence.speaker_id);
        let mergeable = segments.last().is_some_and(|last: &Segment| {
            last.speaker == label && sentence.start_ms.saturating_sub((last.end * 1000.0) as u64) < merge_gap_ms
        });

        if mergeable {
            let last = segments.last_mut().unwrap();
            let trimmed = strip_trailing_terminal_punctuation(&last.text).to_owned();
            last.text = format!("{trimmed} {}", sentence.text);
            last.end = round3(sentence.end_ms);
        } else {
            segments.push(Segment {
                text: sentence.text.clone(),
                start: round3(sentence.start_ms),
                end: round3(sentence.end_ms),
                speaker: label,
            });
        }
    }

    let full_text = segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");
    let total_speakers = speaker_labels.len();
    let total_segments = segments.len();

    MergedCore {
        file_hash: file_hash.to_owned(),
        duration: round3(raw.duration_ms),
        processing_time: round3(raw.processing_time_ms),
        speakers: (1..=total_speakers).map(|n| format!("Speaker{n}")).collect(),
        segments,
        transcription_summary: TranscriptionSummary {
            total_speakers,
            total_segments,
            full_text,
        },
    }
}

/// Serializes a [`MergedCore`] to the cache's derived-payload string.
pub fn serialize_core(core: &MergedCore) -> String {
    serde_json::to_string(core).expect("MergedCore always serializes")
}

/// Stitches the request-specific `task_id` and `file_name` into a cached
/// core payload to build the final completion payload sent to a client.
pub fn to_completion_payload(core_json: &str, task_id: &str, file_name: &str) -> serde_json::Result<String> {
    let mut value: Value = serde_json::from_str(core_json)?;
    if let Value::Object(map) = &mut value {
        map.insert("task_id".to_owned(), Value::String(task_id.to_owned()));
        map.insert("file_name".to_owned(), Value::String(file_name.to_owned()));
    }
    serde_json::to_string(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::model::entity::RawSentence;

    fn sentence(text: &str, start_ms: u64, end_ms: u64, speaker_id: u32) -> RawSentence {
        RawSentence {
            text: text.to_owned(),
            start_ms,
            end_ms,
            speaker_id,
        }
    }

    #[test]
    fn merges_adjacent_same_speaker_within_gap() {
        let raw = RawResult {
            sentences: vec![
                sentence("Hello there.", 0, 1000, 0),
                sentence("How are you?", 1500, 2500, 0),
                sentence("I'm fine.", 6000, 7000, 1),
            ],
            duration_ms: 7000,
            processing_time_ms: 120,
        };

        let core = merge(&raw, "deadbeef", 3000);
        assert_eq!(core.segments.len(), 2);
        assert_eq!(core.segments[0].speaker, "Speaker1");
        assert_eq!(core.segments[0].text, "Hello there How are you?");
        assert_eq!(core.segments[0].start, 0.0);
        assert_eq!(core.segments[0].end, 2.5);
        assert_eq!(core.segments[1].speaker, "Speaker2");
        assert_eq!(core.transcription_summary.total_speakers, 2);
    }

    #[test]
    fn does_not_merge_across_large_gap_or_speaker_change() {
        let raw = RawResult {
            sentences: vec![
                sentence("First.", 0, 1000, 0),
                sentence("Second.", 5000, 6000, 0),
                sentence("Third.", 6100, 7000, 1),
            ],
            duration_ms: 7000,
            processing_time_ms: 50,
        };

        let core = merge(&raw, "hash", 3000);
        assert_eq!(core.segments.len(), 3);
    }

    #[test]
    fn re_merging_segments_is_stable() {
        let raw = RawResult {
            sentences: vec![sentence("A.", 0, 1000, 0), sentence("B.", 1200, 2000, 0)],
            duration_ms: 2000,
            processing_time_ms: 10,
        };
        let once = merge(&raw, "h", 3000);
        let as_sentences: Vec<RawSentence> = once
            .segments
            .iter()
            .enumerate()
            .map(|(i, s)| sentence(&s.text, (s.start * 1000.0) as u64, (s.end * 1000.0) as u64, i as u32))
            .collect();
        let twice = merge(
            &RawResult {
                sentences: as_sentences,
                duration_ms: raw.duration_ms,
                processing_time_ms: raw.processing_time_ms,
            },
            "h",
            3000,
        );
        assert_eq!(once.segments.len(), twice.segments.len());
    }
}
