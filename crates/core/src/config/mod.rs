use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{LipSyncError, Result};

/// Top-level configuration structure for the lip sync pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub segmenter: SegmenterConfig,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Parses a JSON document. Missing sections and fields fall back to their
    /// defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.segmenter.validate()
    }
}

/// Time constants governing the event scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Quiet period after which the mouth is returned to neutral and the
    /// audio/wall-clock reference is forgotten.
    pub inactivity_timeout_ms: f64,
    /// Upper bound of the blend from the previous viseme into the next one.
    pub transition_ms: f64,
    /// Fraction of a viseme's own duration the blend may occupy.
    pub transition_max_fraction: f64,
    /// Number of discrete blended activations emitted before the final target.
    pub blend_steps: u32,
    /// Inter-word gaps at or below this value are not turned into silence.
    pub min_word_gap_ms: f64,
    /// Constant subtracted from inter-word silences to absorb timer latency.
    pub timer_overhead_ms: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: 3_000.0,
            transition_ms: 50.0,
            transition_max_fraction: 0.3,
            blend_steps: 2,
            min_word_gap_ms: 50.0,
            timer_overhead_ms: 27.0,
        }
    }
}

impl SchedulerConfig {
    /// Blend disabled: every viseme snaps straight to its target.
    pub fn without_blending() -> Self {
        Self {
            transition_ms: 0.0,
            ..Self::default()
        }
    }

    /// Effective blend window for a viseme lasting `duration_ms`.
    pub fn transition_window_ms(&self, duration_ms: f64) -> f64 {
        if self.blend_steps == 0 {
            return 0.0;
        }
        self.transition_ms
            .min(duration_ms * self.transition_max_fraction)
            .max(0.0)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.inactivity_timeout_ms.is_finite() && self.inactivity_timeout_ms > 0.0) {
            return Err(LipSyncError::invalid_config(
                "scheduler.inactivity_timeout_ms must be a positive number",
            ));
        }
        if !(self.transition_ms.is_finite() && self.transition_ms >= 0.0) {
            return Err(LipSyncError::invalid_config(
                "scheduler.transition_ms must be zero or positive",
            ));
        }
        if !(self.transition_max_fraction > 0.0 && self.transition_max_fraction <= 1.0) {
            return Err(LipSyncError::invalid_config(
                "scheduler.transition_max_fraction must be within (0, 1]",
            ));
        }
        if !(self.min_word_gap_ms.is_finite() && self.min_word_gap_ms >= 0.0) {
            return Err(LipSyncError::invalid_config(
                "scheduler.min_word_gap_ms must be zero or positive",
            ));
        }
        if !(self.timer_overhead_ms.is_finite() && self.timer_overhead_ms >= 0.0) {
            return Err(LipSyncError::invalid_config(
                "scheduler.timer_overhead_ms must be zero or positive",
            ));
        }
        Ok(())
    }
}

/// Parameters of the word segmenter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Per-character duration used when a word carries no usable timing.
    pub default_char_ms: f64,
    /// Floor applied to every computed per-character duration.
    pub min_char_ms: f64,
    /// Consonants with a distinct viseme that are never folded into a vowel.
    pub retained_consonants: String,
    /// How many consonants after a vowel it may absorb.
    pub max_trailing_absorbed: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            default_char_ms: 75.0,
            min_char_ms: 30.0,
            retained_consonants: "bfmpv".to_string(),
            max_trailing_absorbed: 2,
        }
    }
}

impl SegmenterConfig {
    pub fn is_retained(&self, ch: char) -> bool {
        self.retained_consonants.contains(ch)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.default_char_ms.is_finite() && self.default_char_ms > 0.0) {
            return Err(LipSyncError::invalid_config(
                "segmenter.default_char_ms must be a positive number",
            ));
        }
        if !(self.min_char_ms.is_finite() && self.min_char_ms > 0.0) {
            return Err(LipSyncError::invalid_config(
                "segmenter.min_char_ms must be a positive number",
            ));
        }
        Ok(())
    }
}
