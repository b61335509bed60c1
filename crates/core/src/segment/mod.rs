//! Splits a recognized word into the character visemes that will actually be
//! animated.
//!
//! Vowels anchor the animation. Plain consonants are folded into a
//! neighbouring vowel so that quick consonant clusters do not make the mouth
//! flicker; only the consonants listed in
//! [`SegmenterConfig::retained_consonants`] keep a viseme of their own.

use serde::Serialize;

use crate::{config::SegmenterConfig, mapping::SILENCE};

const VOWELS: &str = "aeiouəıöü";
const EXTENDED_LETTERS: &str = "əıöüçşğ";

/// One emitted sub-event of a word.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub phoneme: char,
    /// Offset from the start of the word.
    pub offset_ms: f64,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Anchor,
    /// Folded into the vowel at the given position.
    Absorbed(usize),
    Dropped,
}

pub fn is_vowel(ch: char) -> bool {
    VOWELS.contains(ch)
}

/// Lowercases `word` and keeps only characters that have a place in the
/// grapheme table alphabet (Latin letters, the extended letters and the
/// silence sentinel).
pub fn normalize(word: &str) -> Vec<char> {
    word.chars()
        .flat_map(char::to_lowercase)
        .filter(|ch| ch.is_ascii_lowercase() || EXTENDED_LETTERS.contains(*ch) || *ch == SILENCE)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct WordSegmenter {
    config: SegmenterConfig,
}

impl WordSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Segments a word that is followed by more speech in the same packet.
    pub fn segment(&self, word: &str, audio_start: f64, audio_end: f64) -> Vec<Segment> {
        self.segment_word(word, audio_start, audio_end, false)
    }

    /// Segments the last word of a packet: a silence sentinel is appended and
    /// receives its own slice of the word's time budget.
    pub fn segment_final(&self, word: &str, audio_start: f64, audio_end: f64) -> Vec<Segment> {
        self.segment_word(word, audio_start, audio_end, true)
    }

    fn segment_word(
        &self,
        word: &str,
        audio_start: f64,
        audio_end: f64,
        final_word: bool,
    ) -> Vec<Segment> {
        let mut chars = normalize(word);
        if final_word {
            chars.push(SILENCE);
        }
        if chars.is_empty() {
            return Vec::new();
        }

        let word_ms = ((audio_end - audio_start) * 1000.0).max(0.0);
        let slice_ms = self.slice_ms(word_ms, chars.len());
        let shares = self.shares(&chars);

        let mut offset_ms = 0.0;
        chars
            .iter()
            .zip(shares)
            .filter(|(_, share)| *share > 0)
            .map(|(&phoneme, share)| {
                let duration_ms = slice_ms * share as f64;
                let segment = Segment {
                    phoneme,
                    offset_ms,
                    duration_ms,
                };
                offset_ms += duration_ms;
                segment
            })
            .collect()
    }

    fn slice_ms(&self, word_ms: f64, count: usize) -> f64 {
        if word_ms > 0.0 && word_ms.is_finite() {
            (word_ms / count as f64).max(self.config.min_char_ms)
        } else {
            self.config.default_char_ms
        }
    }

    fn absorbable(&self, ch: char) -> bool {
        !is_vowel(ch) && ch != SILENCE && !self.config.is_retained(ch)
    }

    /// Number of time slices each character ends up owning. Characters with
    /// zero shares are not emitted.
    fn shares(&self, chars: &[char]) -> Vec<usize> {
        let mut slots = self.cluster(chars);
        let voiced = slots
            .iter()
            .zip(chars)
            .any(|(slot, ch)| *slot == Slot::Anchor && *ch != SILENCE);
        if !voiced && chars[0] != SILENCE {
            // Nothing but plain consonants: let the first one stand in for
            // the word rather than dropping it.
            slots[0] = Slot::Anchor;
        }

        let mut shares = vec![0usize; chars.len()];
        for (index, slot) in slots.iter().enumerate() {
            let owner = match slot {
                Slot::Anchor => Some(index),
                Slot::Absorbed(vowel) => Some(*vowel),
                // Dropped consonants hand their time to the closest survivor.
                Slot::Dropped => (0..index)
                    .rev()
                    .find(|i| slots[*i] == Slot::Anchor)
                    .or_else(|| (index + 1..chars.len()).find(|i| slots[*i] == Slot::Anchor)),
            };
            if let Some(owner) = owner {
                shares[owner] += 1;
            }
        }
        shares
    }

    fn cluster(&self, chars: &[char]) -> Vec<Slot> {
        let mut slots: Vec<Slot> = chars
            .iter()
            .map(|ch| {
                if self.absorbable(*ch) {
                    Slot::Dropped
                } else {
                    Slot::Anchor
                }
            })
            .collect();

        let vowels: Vec<usize> = (0..chars.len()).filter(|i| is_vowel(chars[*i])).collect();

        for &vowel in &vowels {
            if vowel > 0 && slots[vowel - 1] == Slot::Dropped {
                slots[vowel - 1] = Slot::Absorbed(vowel);
            }
        }

        for &vowel in &vowels {
            for next in (vowel + 1..chars.len()).take(self.config.max_trailing_absorbed) {
                if slots[next] != Slot::Dropped {
                    break;
                }
                slots[next] = Slot::Absorbed(vowel);
            }
        }

        slots
    }
}
