use serde::{Deserialize, Serialize};

/// Silence sentinel used for pauses and utterance ends.
pub const SILENCE: char = '_';

pub const OPEN_MOUTH: &str = "Merged_Open_Mouth";
pub const LIP_OPEN: &str = "V_Lip_Open";
pub const TIGHT_O: &str = "V_Tight_O";
pub const DENTAL_LIP: &str = "V_Dental_Lip";
pub const EXPLOSIVE: &str = "V_Explosive";
pub const WIDE: &str = "V_Wide";

/// Weight kept on [`WIDE`] while the mouth is at rest, so the face does not
/// look slack between utterances.
pub const NEUTRAL_WIDE_WEIGHT: f32 = 0.1;

/// A single morph channel and the weight it should be driven to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphWeight {
    pub target: String,
    pub value: f32,
}

impl MorphWeight {
    pub fn new(target: impl Into<String>, value: f32) -> Self {
        Self {
            target: target.into(),
            value: value.clamp(0.0, 1.0),
        }
    }
}

/// Set of morph weights describing one mouth shape.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouthTarget {
    weights: Vec<MorphWeight>,
}

impl MouthTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closed, relaxed mouth.
    pub fn neutral() -> Self {
        let mut target = Self::new();
        target.push(OPEN_MOUTH, 0.0);
        target.push(LIP_OPEN, 0.0);
        target.push(TIGHT_O, 0.0);
        target.push(DENTAL_LIP, 0.0);
        target.push(EXPLOSIVE, 0.0);
        target.push(WIDE, NEUTRAL_WIDE_WEIGHT);
        target
    }

    fn from_pairs(pairs: &[(&str, f32)]) -> Self {
        let mut target = Self::new();
        for (name, value) in pairs {
            target.push(name, *value);
        }
        target
    }

    /// Sets `target` to `value`, replacing an existing entry for that channel.
    pub fn push(&mut self, target: &str, value: f32) {
        match self.weights.iter_mut().find(|w| w.target == target) {
            Some(existing) => existing.value = value.clamp(0.0, 1.0),
            None => self.weights.push(MorphWeight::new(target, value)),
        }
    }

    pub fn weights(&self) -> &[MorphWeight] {
        &self.weights
    }

    /// Weight of `target`, `0.0` when the channel is not driven.
    pub fn weight(&self, target: &str) -> f32 {
        self.weights
            .iter()
            .find(|w| w.target == target)
            .map(|w| w.value)
            .unwrap_or(0.0)
    }

    pub fn is_neutral(&self) -> bool {
        self.weights.iter().all(|w| {
            let rest = if w.target == WIDE {
                NEUTRAL_WIDE_WEIGHT
            } else {
                0.0
            };
            (w.value - rest).abs() <= f32::EPSILON
        })
    }

    /// Linear interpolation from `from` to `to` at `progress` in `[0, 1]`.
    ///
    /// Channels present on only one side are treated as `0.0` on the other,
    /// so a channel the next shape does not use fades out instead of
    /// snapping off.
    pub fn blend(from: &MouthTarget, to: &MouthTarget, progress: f32) -> MouthTarget {
        let t = if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            1.0
        };

        let mut blended = MouthTarget::new();
        for weight in &from.weights {
            let start = weight.value;
            let end = to.weight(&weight.target);
            blended.push(&weight.target, start + (end - start) * t);
        }
        for weight in &to.weights {
            if from.weights.iter().all(|w| w.target != weight.target) {
                blended.push(&weight.target, weight.value * t);
            }
        }
        blended
    }
}

/// Looks up the mouth shape for a single grapheme.
///
/// Total over `char`: unknown characters and [`SILENCE`] resolve to
/// [`MouthTarget::neutral`].
pub fn targets_for(character: char) -> MouthTarget {
    let lower = character.to_lowercase().next().unwrap_or(character);
    match lower {
        'a' => MouthTarget::from_pairs(&[(OPEN_MOUTH, 0.6), (WIDE, 0.2)]),
        'ə' => MouthTarget::from_pairs(&[(OPEN_MOUTH, 0.5), (WIDE, 0.1)]),
        'i' | 'ı' => MouthTarget::from_pairs(&[(OPEN_MOUTH, 0.2), (WIDE, 0.6)]),
        'e' => MouthTarget::from_pairs(&[(OPEN_MOUTH, 0.3), (WIDE, 0.6)]),
        'u' | 'ü' => MouthTarget::from_pairs(&[(TIGHT_O, 1.0)]),
        'o' | 'ö' => MouthTarget::from_pairs(&[(OPEN_MOUTH, 0.1), (TIGHT_O, 0.7)]),
        'l' | 'r' | 'n' | 's' | 't' | 'd' => {
            MouthTarget::from_pairs(&[(OPEN_MOUTH, 0.2), (WIDE, 0.3)])
        }
        'g' | 'y' | 'ç' | 'z' | 'c' => MouthTarget::from_pairs(&[(OPEN_MOUTH, 0.2), (WIDE, 0.2)]),
        'k' | 'ş' | 'q' | 'x' | 'j' | 'h' | 'ğ' => {
            MouthTarget::from_pairs(&[(OPEN_MOUTH, 0.2), (WIDE, 0.1)])
        }
        'm' | 'b' | 'p' => MouthTarget::from_pairs(&[(EXPLOSIVE, 1.0), (WIDE, 0.1)]),
        'f' => MouthTarget::from_pairs(&[(DENTAL_LIP, 1.0), (WIDE, 0.1)]),
        'v' => MouthTarget::from_pairs(&[(DENTAL_LIP, 1.0)]),
        _ => MouthTarget::neutral(),
    }
}
