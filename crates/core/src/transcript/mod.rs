use serde::{Deserialize, Serialize};

/// One recognized word as delivered by the speech recognizer. Timestamps are
/// seconds relative to the start of the recognized audio stream and may be
/// missing or garbage; see [`normalize_words`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl WordTimestamp {
    pub fn new(word: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            word: word.into(),
            start: Some(start),
            end: Some(end),
            confidence: None,
        }
    }
}

/// A batch of words delivered atomically for one logical utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    pub sequence_id: u64,
    #[serde(default)]
    pub words: Vec<WordTimestamp>,
}

impl Packet {
    pub fn new(sequence_id: u64, words: Vec<WordTimestamp>) -> Self {
        Self { sequence_id, words }
    }
}

/// Word with timestamps that are guaranteed finite, non-negative and ordered
/// (`start <= end`).
#[derive(Debug, Clone, PartialEq)]
pub struct TimedWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// Repairs malformed timestamps instead of rejecting them.
///
/// A missing, NaN or negative `start` falls back to the previous word's end
/// (or `0.0` for the first word). A bad `end`, or one before `start`,
/// collapses onto `start`.
pub fn normalize_words(words: &[WordTimestamp]) -> Vec<TimedWord> {
    let mut previous_end = 0.0;
    words
        .iter()
        .map(|word| {
            let start = sanitize(word.start).unwrap_or(previous_end);
            let end = sanitize(word.end)
                .filter(|end| *end >= start)
                .unwrap_or(start);
            previous_end = end;
            TimedWord {
                text: word.word.clone(),
                start,
                end,
            }
        })
        .collect()
}

fn sanitize(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}
