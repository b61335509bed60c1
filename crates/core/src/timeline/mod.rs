//! Mapping between audio-relative time (seconds into the recognized stream)
//! and wall-clock time (milliseconds on a monotonic clock).

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};

/// Monotonic millisecond time source.
pub trait Clock {
    fn now_ms(&self) -> f64;
}

/// Hand-driven clock. Clones share the same time, so a test can keep one
/// handle while the scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(ms: f64) -> Self {
        let clock = Self::new();
        clock.set(ms);
        clock
    }

    pub fn set(&self, ms: f64) {
        self.bits.store(ms.max(0.0).to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: f64) {
        self.set(self.now_ms() + delta_ms.max(0.0));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Reference point tying the most recently scheduled audio to wall-clock
/// time. Both fields are zero when no speech has been seen recently.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulerClock {
    /// End of the most recently scheduled packet, seconds of audio.
    pub last_processed_audio_end: f64,
    /// Wall-clock time of the most recent packet. Diagnostic only: lead-in
    /// is measured from the queue tail, not from packet arrival.
    pub last_activity_wall_ms: f64,
}

impl SchedulerClock {
    pub fn reset(&mut self) {
        self.last_processed_audio_end = 0.0;
        self.last_activity_wall_ms = 0.0;
    }

    pub fn is_reset(&self) -> bool {
        self.last_processed_audio_end <= 0.0
    }

    /// Records a packet whose audio reaches `audio_end`.
    pub fn record_packet(&mut self, audio_end: f64, now_ms: f64) {
        if audio_end > 0.0 {
            self.last_processed_audio_end = audio_end;
        }
        self.last_activity_wall_ms = now_ms;
    }

    /// Wall time elapsed since the last recorded packet, or `None` when the
    /// reference has been reset.
    pub fn since_last_packet_ms(&self, now_ms: f64) -> Option<f64> {
        (!self.is_reset()).then(|| (now_ms - self.last_activity_wall_ms).max(0.0))
    }

    /// Silence to insert before a packet whose first word starts at
    /// `first_word_start`, given that the events already queued finish at
    /// wall time `tail_wall_ms`.
    ///
    /// Returns zero when nothing was scheduled recently or when the packet
    /// overlaps audio that was already scheduled. Otherwise the audio gap is
    /// played back after the queue tail, minus any wall time the mouth has
    /// already spent idle since the tail finished.
    pub fn lead_in_ms(&self, first_word_start: f64, tail_wall_ms: f64, now_ms: f64) -> f64 {
        if self.is_reset() || first_word_start <= self.last_processed_audio_end {
            return 0.0;
        }

        let delay_from_now = to_wall_clock_delay(
            first_word_start,
            self.last_processed_audio_end,
            tail_wall_ms,
            now_ms,
        );
        let pending_ms = (tail_wall_ms - now_ms).max(0.0);
        (delay_from_now - pending_ms).max(0.0)
    }
}

/// Delay from `now_ms` until `audio_timestamp` should be shown, given that
/// audio time `reference_audio` corresponds to wall time `reference_wall_ms`.
///
/// Never negative: timestamps that already elapsed fire immediately.
pub fn to_wall_clock_delay(
    audio_timestamp: f64,
    reference_audio: f64,
    reference_wall_ms: f64,
    now_ms: f64,
) -> f64 {
    let delay = (audio_timestamp - reference_audio) * 1000.0 + (reference_wall_ms - now_ms);
    if delay.is_finite() {
        delay.max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_never_negative() {
        assert_eq!(to_wall_clock_delay(1.0, 10.0, 0.0, 5_000.0), 0.0);
        assert_eq!(to_wall_clock_delay(f64::NAN, 0.0, 0.0, 0.0), 0.0);
        assert_eq!(to_wall_clock_delay(2.5, 2.0, 1_000.0, 1_000.0), 500.0);
        assert_eq!(to_wall_clock_delay(2.5, 2.0, 1_200.0, 1_000.0), 700.0);
    }

    #[test]
    fn tracks_time_since_last_packet() {
        let mut clock = SchedulerClock::default();
        assert_eq!(clock.since_last_packet_ms(500.0), None);

        clock.record_packet(1.5, 1_000.0);
        assert_eq!(clock.since_last_packet_ms(1_250.0), Some(250.0));
        assert_eq!(clock.since_last_packet_ms(900.0), Some(0.0));

        clock.reset();
        assert_eq!(clock.since_last_packet_ms(2_000.0), None);
    }

    #[test]
    fn pause_between_packets_becomes_lead_in() {
        let mut clock = SchedulerClock::default();
        clock.record_packet(2.0, 0.0);

        // Queue still busy for another 300ms: the full 400ms audio gap is
        // played after it.
        assert!((clock.lead_in_ms(2.4, 1_300.0, 1_000.0) - 400.0).abs() < 1e-9);
        // Queue went idle 100ms ago: only the remainder is left.
        assert!((clock.lead_in_ms(2.4, 900.0, 1_000.0) - 300.0).abs() < 1e-9);
        // Idle for longer than the gap: start right away.
        assert_eq!(clock.lead_in_ms(2.4, 100.0, 1_000.0), 0.0);
    }

    #[test]
    fn overlapping_packet_has_no_lead_in() {
        let mut clock = SchedulerClock::default();
        clock.record_packet(2.0, 0.0);

        assert_eq!(clock.lead_in_ms(1.8, 1_300.0, 1_000.0), 0.0);
        assert_eq!(clock.lead_in_ms(2.0, 1_300.0, 1_000.0), 0.0);
    }

    #[test]
    fn reset_clock_has_no_lead_in() {
        let mut clock = SchedulerClock::default();
        clock.record_packet(4.0, 10.0);
        clock.reset();

        assert!(clock.is_reset());
        assert_eq!(clock.lead_in_ms(6.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn manual_clock_handles_share_time() {
        let clock = ManualClock::at(10.0);
        let handle = clock.clone();

        handle.advance(15.5);
        assert_eq!(clock.now_ms(), 25.5);
        handle.advance(-3.0);
        assert_eq!(clock.now_ms(), 25.5);
    }
}
