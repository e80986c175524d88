use domain::model::entity::RawResult;
use serde_json::json;

fn timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

/// Converts a raw result straight to SRT cues, one per sentence, without any
/// merging (§4.6). Pure and total over well-formed input.
pub fn convert(raw: &RawResult) -> String {
    let mut speaker_labels: Vec<u32> = Vec::new();
    let mut label_for = |speaker_id: u32| -> String {
        let index = speaker_labels.iter().position(|&id| id == speaker_id).unwrap_or_else(|| {
            speaker_labels.push(speaker_id);
            speaker_labels.len() - 1
        });
        format!("Speaker{}", index + 1)
    };

    let mut out = String::new();
    for (i, sentence) in raw.sentences.iter().enumerate() {
        let label = label_for(sentence.speaker_id);
        out.push_str(&format!("{}\n", i + 1));
        out.push_str(&format!(
            "{} --> {}\n",
            timestamp(sentence.start_ms),
            timestamp(sentence.end_ms)
        ));
        out.push_str(&format!("{label}:{}\n\n", sentence.text));
    }
    out
}

/// Wraps raw SRT text into the wire completion payload:
/// `{ format: "srt", content, file_name, file_hash }`.
pub fn to_completion_payload(content: &str, file_name: &str, file_hash: &str) -> String {
    json!({
        "format": "srt",
        "content": content,
        "file_name": file_name,
        "file_hash": file_hash,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::model::entity::RawSentence;

    #[test]
    fn formats_each_sentence_as_one_cue() {
        let raw = RawResult {
            sentences: vec![
                RawSentence { text: "Hi.".into(), start_ms: 0, end_ms: 1500, speaker_id: 0 },
                RawSentence { text: "Bye.".into(), start_ms: 2000, end_ms: 3750, speaker_id: 1 },
            ],
            duration_ms: 3750,
            processing_time_ms: 10,
        };
        let srt = convert(&raw);
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,500\nSpeaker1:Hi.\n\n"));
        assert!(srt.contains("2\n00:00:02,000 --> 00:00:03,750\nSpeaker2:Bye.\n\n"));
    }
}
