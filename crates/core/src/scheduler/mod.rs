//! Discrete-event scheduler that turns recognized word packets into timed
//! mouth-shape activations.
//!
//! The scheduler is single threaded and does no waiting of its own. It keeps
//! one drain timer and one inactivity watchdog as plain deadlines on its
//! [`Clock`]; a driver calls [`EventScheduler::poll`] whenever
//! [`EventScheduler::next_deadline`] has passed (see [`crate::runtime`]).

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::{AppConfig, SchedulerConfig},
    mapping::{targets_for, MouthTarget, SILENCE},
    render::VisemeSink,
    segment::WordSegmenter,
    session::SessionTracker,
    timeline::{Clock, SchedulerClock},
    transcript::{normalize_words, Packet, TimedWord, WordTimestamp},
};

/// One timed mouth shape waiting in, or fired from, the schedule queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisemeEvent {
    pub id: u64,
    pub phoneme: char,
    pub duration_ms: f64,
    pub session_id: u64,
    /// Audio-relative span this viseme stands for, in seconds.
    pub audio_start: f64,
    pub audio_end: f64,
}

impl VisemeEvent {
    pub fn is_silence(&self) -> bool {
        self.phoneme == SILENCE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    /// Queue empty and no drain timer armed.
    Idle,
    /// A viseme is showing and the drain timer is armed.
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TimerKind {
    /// Pop the next event from the queue.
    Advance,
    /// Emit blend step `n` of the active viseme; the last step is the
    /// unblended target.
    Blend(u32),
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    deadline_ms: f64,
    kind: TimerKind,
}

#[derive(Debug, Clone)]
struct ActiveViseme {
    event: VisemeEvent,
    from: MouthTarget,
    target: MouthTarget,
    started_ms: f64,
    window_ms: f64,
    steps: u32,
}

impl ActiveViseme {
    fn ends_ms(&self) -> f64 {
        self.started_ms + self.event.duration_ms
    }

    /// Wall time at which blend slice `slice` of the transition window ends.
    fn slice_end_ms(&self, slice: u32) -> f64 {
        self.started_ms + self.window_ms * f64::from(slice + 1) / f64::from(self.steps + 1)
    }
}

pub struct EventScheduler<S, C> {
    config: SchedulerConfig,
    segmenter: WordSegmenter,
    sink: S,
    clock: C,
    queue: VecDeque<VisemeEvent>,
    timer: Option<Timer>,
    watchdog_ms: Option<f64>,
    active: Option<ActiveViseme>,
    drained_at_ms: Option<f64>,
    last_emitted: Option<MouthTarget>,
    last_phoneme: Option<char>,
    reference: SchedulerClock,
    sessions: SessionTracker,
    next_id: u64,
}

impl<S: VisemeSink, C: Clock> EventScheduler<S, C> {
    pub fn new(config: AppConfig, sink: S, clock: C) -> Self {
        Self {
            config: config.scheduler,
            segmenter: WordSegmenter::new(config.segmenter),
            sink,
            clock,
            queue: VecDeque::new(),
            timer: None,
            watchdog_ms: None,
            active: None,
            drained_at_ms: None,
            last_emitted: None,
            last_phoneme: None,
            reference: SchedulerClock::default(),
            sessions: SessionTracker::new(),
            next_id: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.timer.is_some() {
            SchedulerState::Draining
        } else {
            SchedulerState::Idle
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queued(&self) -> impl Iterator<Item = &VisemeEvent> {
        self.queue.iter()
    }

    /// Event whose shape is currently showing, if any.
    pub fn active_event(&self) -> Option<&VisemeEvent> {
        self.active.as_ref().map(|active| &active.event)
    }

    pub fn clock(&self) -> &SchedulerClock {
        &self.reference
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn time_source(&self) -> &C {
        &self.clock
    }

    /// Earliest armed deadline (drain timer or watchdog).
    pub fn next_deadline(&self) -> Option<f64> {
        match (self.timer.map(|timer| timer.deadline_ms), self.watchdog_ms) {
            (Some(timer), Some(watchdog)) => Some(timer.min(watchdog)),
            (timer, watchdog) => timer.or(watchdog),
        }
    }

    pub fn process(&mut self, packet: &Packet) {
        self.process_packet(&packet.words, packet.sequence_id);
    }

    /// Ingress for recognizer output: validates the session, segments the
    /// words, reconciles them with wall-clock time and enqueues the result.
    pub fn process_packet(&mut self, words: &[WordTimestamp], sequence_id: u64) {
        let now = self.clock.now_ms();
        let tail_session = self.queue.back().map(|event| event.session_id);
        if self.sessions.observe(tail_session, sequence_id) {
            info!(
                from = ?tail_session,
                to = sequence_id,
                "session changed, dropping queued visemes"
            );
            self.flush();
        }
        self.watchdog_ms = Some(now + self.config.inactivity_timeout_ms);

        if words.is_empty() {
            debug!(sequence_id, "empty packet, returning to neutral");
            self.flush();
            self.reference.reset();
            self.emit_silence(sequence_id);
            return;
        }

        let timed = normalize_words(words);
        let events = self.build_events(&timed, sequence_id);
        let tail_wall_ms = self.tail_wall_ms(now);
        let lead_in_ms = self.reference.lead_in_ms(timed[0].start, tail_wall_ms, now);
        let audio_end = timed.iter().map(|word| word.end).fold(0.0, f64::max);

        debug!(
            sequence_id,
            words = timed.len(),
            events = events.len(),
            lead_in_ms,
            audio_end,
            since_last_packet_ms = ?self.reference.since_last_packet_ms(now),
            "processing packet"
        );

        self.reference.record_packet(audio_end, now);
        self.enqueue(events, lead_in_ms);
    }

    /// Segments every word and inserts explicit silences for audible pauses
    /// between consecutive words.
    pub fn build_events(&mut self, words: &[TimedWord], session_id: u64) -> Vec<VisemeEvent> {
        let mut events = Vec::new();
        let Some(last) = words.len().checked_sub(1) else {
            return events;
        };

        for (index, word) in words.iter().enumerate() {
            if index > 0 {
                let previous = &words[index - 1];
                let gap_ms = (word.start - previous.end) * 1000.0;
                if gap_ms > self.config.min_word_gap_ms {
                    let duration_ms = (gap_ms - self.config.timer_overhead_ms)
                        .max(self.segmenter.config().min_char_ms);
                    let id = self.allocate_id();
                    events.push(VisemeEvent {
                        id,
                        phoneme: SILENCE,
                        duration_ms,
                        session_id,
                        audio_start: previous.end,
                        audio_end: word.start,
                    });
                }
            }

            let segments = if index == last {
                self.segmenter.segment_final(&word.text, word.start, word.end)
            } else {
                self.segmenter.segment(&word.text, word.start, word.end)
            };
            for segment in segments {
                let audio_start = word.start + segment.offset_ms / 1000.0;
                let id = self.allocate_id();
                events.push(VisemeEvent {
                    id,
                    phoneme: segment.phoneme,
                    duration_ms: segment.duration_ms,
                    session_id,
                    audio_start,
                    audio_end: audio_start + segment.duration_ms / 1000.0,
                });
            }
        }

        events
    }

    /// Hands `events` to the scheduler. When idle the drain timer is armed
    /// `lead_in_ms` from now; otherwise the events extend the running drain
    /// and a lead-in is played as a silence ahead of them.
    pub fn enqueue(&mut self, events: Vec<VisemeEvent>, lead_in_ms: f64) {
        if events.is_empty() {
            return;
        }

        let now = self.clock.now_ms();
        let lead_in_ms = if lead_in_ms.is_finite() {
            lead_in_ms.max(0.0)
        } else {
            0.0
        };
        let fallback_ms = self.segmenter.config().default_char_ms;
        let events = events.into_iter().map(|mut event| {
            if !(event.duration_ms.is_finite() && event.duration_ms > 0.0) {
                event.duration_ms = fallback_ms;
            }
            event
        });

        if self.watchdog_ms.is_none() {
            self.watchdog_ms = Some(now + self.config.inactivity_timeout_ms);
        }

        match self.state() {
            SchedulerState::Idle => {
                self.queue.extend(events);
                self.timer = Some(Timer {
                    deadline_ms: now + lead_in_ms,
                    kind: TimerKind::Advance,
                });
            }
            SchedulerState::Draining => {
                let mut events = events.peekable();
                if lead_in_ms > 0.0 {
                    if let Some(first) = events.peek() {
                        let (session_id, audio_end) = (first.session_id, first.audio_start);
                        let id = self.allocate_id();
                        self.queue.push_back(VisemeEvent {
                            id,
                            phoneme: SILENCE,
                            duration_ms: lead_in_ms,
                            session_id,
                            audio_start: (audio_end - lead_in_ms / 1000.0).max(0.0),
                            audio_end,
                        });
                    }
                }
                self.queue.extend(events);
            }
        }
    }

    /// Fires the drain timer: either the next blend step of the active
    /// viseme or the switch to the next queued event.
    pub fn on_timer_fire(&mut self) {
        let Some(timer) = self.timer.take() else {
            return;
        };

        match timer.kind {
            TimerKind::Advance => self.advance(timer.deadline_ms),
            TimerKind::Blend(step) => self.blend_step(step),
        }
    }

    fn advance(&mut self, deadline_ms: f64) {
        let Some(event) = self.queue.pop_front() else {
            debug!("schedule queue drained");
            self.active = None;
            self.drained_at_ms = Some(deadline_ms);
            if self.watchdog_ms.is_none() {
                self.watchdog_ms = Some(self.clock.now_ms() + self.config.inactivity_timeout_ms);
            }
            return;
        };

        debug!(
            id = event.id,
            phoneme = %event.phoneme,
            duration_ms = event.duration_ms,
            session = event.session_id,
            "firing viseme"
        );

        let target = targets_for(event.phoneme);
        let from = self.last_emitted.clone().unwrap_or_else(MouthTarget::neutral);
        let window_ms = self.config.transition_window_ms(event.duration_ms);
        let behind = self.clock.now_ms() >= deadline_ms + window_ms;
        let steps = if window_ms > 0.0 && !behind && from != target {
            self.config.blend_steps
        } else {
            0
        };

        self.last_phoneme = Some(event.phoneme);
        self.sink.viseme_started(&event);
        let active = ActiveViseme {
            event,
            from,
            target,
            started_ms: deadline_ms,
            window_ms,
            steps,
        };
        if steps == 0 {
            self.active = Some(active);
            self.blend_step(0);
        } else {
            // The previous shape is still correct at the start of the
            // window; the first blend is due one slice in.
            self.timer = Some(Timer {
                deadline_ms: active.slice_end_ms(0),
                kind: TimerKind::Blend(0),
            });
            self.active = Some(active);
        }
    }

    /// Step `n` is emitted at the end of slice `n` of the window with the
    /// blend weight reached at that moment, so the final step lands on the
    /// target exactly when the window closes.
    fn blend_step(&mut self, step: u32) {
        let Some(active) = self.active.as_ref() else {
            return;
        };

        if step >= active.steps {
            let target = active.target.clone();
            let next = Timer {
                deadline_ms: active.ends_ms(),
                kind: TimerKind::Advance,
            };
            self.emit(target);
            self.timer = Some(next);
            return;
        }

        let progress = (step + 1) as f32 / (active.steps + 1) as f32;
        let blended = MouthTarget::blend(&active.from, &active.target, progress);
        let next = Timer {
            deadline_ms: active.slice_end_ms(step + 1),
            kind: TimerKind::Blend(step + 1),
        };
        self.emit(blended);
        self.timer = Some(next);
    }

    /// Fires the inactivity watchdog.
    pub fn on_watchdog_fire(&mut self) {
        let Some(deadline_ms) = self.watchdog_ms.take() else {
            return;
        };

        let now = self.clock.now_ms();
        if self.state() == SchedulerState::Draining {
            let rearm = self.tail_wall_ms(now).max(deadline_ms) + self.config.inactivity_timeout_ms;
            self.watchdog_ms = Some(rearm);
            return;
        }

        let speaking = matches!(self.last_phoneme, Some(phoneme) if phoneme != SILENCE);
        info!(speaking, "inactivity timeout elapsed");
        let session_id = self.sessions.current().unwrap_or_default();
        if speaking {
            self.emit_silence(session_id);
        }
        self.reference.reset();
    }

    /// Drops everything queued and cancels the drain timer. Nothing is
    /// emitted; the next packet or the watchdog brings the mouth back.
    pub fn flush(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        if self.timer.take().is_some() || self.active.is_some() {
            self.drained_at_ms = Some(self.clock.now_ms());
        }
        self.active = None;
        if dropped > 0 {
            info!(dropped, "flushed schedule queue");
        }
    }

    /// Fires every timer whose deadline has passed, in deadline order.
    /// Returns how many firings happened.
    pub fn poll(&mut self) -> usize {
        let mut fired = 0;
        loop {
            let now = self.clock.now_ms();
            let timer_due = self
                .timer
                .map(|timer| timer.deadline_ms)
                .filter(|deadline| *deadline <= now);
            let watchdog_due = self.watchdog_ms.filter(|deadline| *deadline <= now);

            match (timer_due, watchdog_due) {
                (Some(timer), Some(watchdog)) if watchdog < timer => self.on_watchdog_fire(),
                (Some(_), _) => self.on_timer_fire(),
                (None, Some(_)) => self.on_watchdog_fire(),
                (None, None) => break,
            }
            fired += 1;
        }
        fired
    }

    /// Teardown: cancels every timer and leaves the mouth neutral.
    pub fn shutdown(&mut self) {
        self.flush();
        self.watchdog_ms = None;
        self.reference.reset();
        if matches!(self.last_phoneme, Some(phoneme) if phoneme != SILENCE) {
            let session_id = self.sessions.current().unwrap_or_default();
            self.emit_silence(session_id);
        }
        debug!("scheduler shut down");
    }

    /// Wall-clock time at which everything currently queued has played.
    fn tail_wall_ms(&self, now: f64) -> f64 {
        let Some(timer) = self.timer else {
            return self.drained_at_ms.unwrap_or(now).min(now);
        };
        let current_end = self
            .active
            .as_ref()
            .map(ActiveViseme::ends_ms)
            .unwrap_or(timer.deadline_ms);
        current_end + self.queue.iter().map(|event| event.duration_ms).sum::<f64>()
    }

    /// Shows a silence right away, outside of the queue.
    fn emit_silence(&mut self, session_id: u64) {
        let audio = self.reference.last_processed_audio_end;
        let event = VisemeEvent {
            id: self.allocate_id(),
            phoneme: SILENCE,
            duration_ms: self.segmenter.config().default_char_ms,
            session_id,
            audio_start: audio,
            audio_end: audio,
        };
        self.last_phoneme = Some(SILENCE);
        self.sink.viseme_started(&event);
        self.emit(targets_for(SILENCE));
    }

    fn emit(&mut self, targets: MouthTarget) {
        if let Err(err) = self.sink.apply_mouth_targets(&targets) {
            warn!(error = %err, "viseme sink failed to apply mouth targets");
        }
        self.last_emitted = Some(targets);
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl<S, C> std::fmt::Debug for EventScheduler<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScheduler")
            .field("queue", &self.queue.len())
            .field("timer", &self.timer)
            .field("watchdog_ms", &self.watchdog_ms)
            .field("reference", &self.reference)
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::{
        mapping::{OPEN_MOUTH, TIGHT_O},
        record::RecordingSink,
        runtime::advance_to,
        timeline::ManualClock,
        LipSyncError, Result,
    };

    type TestScheduler = EventScheduler<RecordingSink, ManualClock>;

    fn build(config: AppConfig) -> (TestScheduler, RecordingSink, ManualClock) {
        let clock = ManualClock::new();
        let recorder = RecordingSink::with_clock(clock.clone());
        let scheduler = EventScheduler::new(config, recorder.clone(), clock.clone());
        (scheduler, recorder, clock)
    }

    fn unblended() -> AppConfig {
        AppConfig {
            scheduler: SchedulerConfig::without_blending(),
            ..AppConfig::default()
        }
    }

    fn event(id: u64, phoneme: char, duration_ms: f64) -> VisemeEvent {
        VisemeEvent {
            id,
            phoneme,
            duration_ms,
            session_id: 1,
            audio_start: 0.0,
            audio_end: duration_ms / 1000.0,
        }
    }

    #[test]
    fn enqueue_while_idle_starts_draining_in_order() {
        let (mut scheduler, recorder, clock) = build(unblended());
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        scheduler.enqueue(
            vec![event(0, 'a', 100.0), event(1, 'm', 100.0), event(2, 'o', 100.0)],
            0.0,
        );
        assert_eq!(scheduler.state(), SchedulerState::Draining);
        assert_eq!(scheduler.next_deadline(), Some(0.0));

        advance_to(&mut scheduler, &clock, 150.0);
        assert_eq!(recorder.phonemes().unwrap(), "am");
        assert_eq!(scheduler.active_event().map(|e| e.id), Some(1));

        advance_to(&mut scheduler, &clock, 400.0);
        assert_eq!(recorder.phonemes().unwrap(), "amo");
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.queue_len(), 0);

        let times: Vec<_> = recorder
            .activations()
            .unwrap()
            .iter()
            .map(|a| a.at_ms.unwrap())
            .collect();
        assert_eq!(times, vec![0.0, 100.0, 200.0]);
    }

    #[test]
    fn enqueue_while_draining_extends_the_tail() {
        let (mut scheduler, recorder, clock) = build(unblended());
        scheduler.enqueue(vec![event(0, 'a', 100.0)], 0.0);
        scheduler.poll();

        clock.set(40.0);
        scheduler.enqueue(vec![event(1, 'e', 100.0)], 0.0);
        assert_eq!(scheduler.next_deadline(), Some(100.0));
        assert_eq!(scheduler.queue_len(), 1);

        advance_to(&mut scheduler, &clock, 250.0);
        assert_eq!(recorder.event_ids().unwrap(), vec![0, 1]);
    }

    #[test]
    fn blends_from_previous_shape_before_settling() {
        let (mut scheduler, recorder, clock) = build(AppConfig::default());
        scheduler.enqueue(vec![event(0, 'a', 1_000.0), event(1, 'u', 1_000.0)], 0.0);

        advance_to(&mut scheduler, &clock, 1_100.0);

        let activations = recorder.activations().unwrap();
        // Two blended steps and the final target for each viseme.
        assert_eq!(activations.len(), 6);

        let first_u = &activations[3];
        assert_eq!(first_u.phoneme, Some('u'));
        assert!((first_u.at_ms.unwrap() - (1_000.0 + 50.0 / 3.0)).abs() < 1e-9);
        assert!((first_u.targets.weight(TIGHT_O) - 1.0 / 3.0).abs() < 1e-5);
        assert!((first_u.targets.weight(OPEN_MOUTH) - 0.4).abs() < 1e-5);

        let settled = &activations[5];
        assert_eq!(settled.at_ms, Some(1_050.0));
        assert_eq!(settled.targets, targets_for('u'));
    }

    #[test]
    fn blend_weight_tracks_elapsed_window() {
        let (mut scheduler, recorder, clock) = build(AppConfig::default());
        scheduler.enqueue(vec![event(0, 'a', 1_000.0), event(1, 'u', 1_000.0)], 0.0);

        advance_to(&mut scheduler, &clock, 1_000.0);
        // Nothing new is shown the instant the viseme starts.
        assert_eq!(recorder.len(), 3);
        assert_eq!(recorder.phonemes().unwrap(), "au");

        advance_to(&mut scheduler, &clock, 1_100.0);
        let u_steps: Vec<_> = recorder
            .activations()
            .unwrap()
            .into_iter()
            .filter(|a| a.phoneme == Some('u'))
            .collect();
        assert_eq!(u_steps.len(), 3);
        for step in &u_steps {
            let elapsed = (step.at_ms.unwrap() - 1_000.0) / 50.0;
            assert!(elapsed > 0.0);
            assert!((f64::from(step.targets.weight(TIGHT_O)) - elapsed).abs() < 1e-5);
        }
    }

    #[test]
    fn blend_window_is_capped_for_short_visemes() {
        let (mut scheduler, recorder, clock) = build(AppConfig::default());
        scheduler.enqueue(vec![event(0, 'a', 40.0), event(1, 'o', 40.0)], 0.0);

        advance_to(&mut scheduler, &clock, 100.0);

        let activations = recorder.activations().unwrap();
        let o_steps: Vec<_> = activations
            .iter()
            .filter(|a| a.phoneme == Some('o'))
            .collect();
        assert_eq!(o_steps.len(), 3);
        let last = o_steps.last().unwrap();
        assert!(last.at_ms.unwrap() <= 40.0 + 12.0 + 1e-9);
        assert_eq!(last.targets, targets_for('o'));
    }

    #[test]
    fn new_session_discards_everything_still_queued() {
        let (mut scheduler, recorder, clock) = build(AppConfig::default());
        scheduler.process_packet(
            &[
                WordTimestamp::new("salam", 0.0, 1.0),
                WordTimestamp::new("dünya", 1.2, 2.0),
            ],
            1,
        );
        advance_to(&mut scheduler, &clock, 300.0);

        let abandoned: Vec<u64> = scheduler.queued().map(|e| e.id).collect();
        assert!(!abandoned.is_empty());

        scheduler.process_packet(&[WordTimestamp::new("ana", 0.0, 0.5)], 2);
        assert!(scheduler.queued().all(|e| e.session_id == 2));
        advance_to(&mut scheduler, &clock, 10_000.0);

        let fired = recorder.event_ids().unwrap();
        assert!(abandoned.iter().all(|id| !fired.contains(id)));
        assert_eq!(scheduler.sessions().flushes(), 1);
        assert!(recorder
            .started()
            .unwrap()
            .iter()
            .any(|e| e.session_id == 2 && e.phoneme == 'a'));
    }

    #[test]
    fn same_session_packets_are_appended() {
        let (mut scheduler, _recorder, clock) = build(unblended());
        scheduler.process_packet(&[WordTimestamp::new("ana", 0.0, 0.3)], 7);
        advance_to(&mut scheduler, &clock, 50.0);
        let queued_before = scheduler.queue_len();

        scheduler.process_packet(&[WordTimestamp::new("ata", 0.25, 0.5)], 7);

        assert!(scheduler.queue_len() > queued_before);
        assert_eq!(scheduler.sessions().flushes(), 0);
    }

    #[test]
    fn empty_packet_emits_exactly_one_silence() {
        let (mut scheduler, recorder, clock) = build(AppConfig::default());
        scheduler.process_packet(&[WordTimestamp::new("salam", 0.0, 1.0)], 1);
        advance_to(&mut scheduler, &clock, 200.0);
        recorder.clear().unwrap();

        scheduler.process_packet(&[], 1);

        let activations = recorder.activations().unwrap();
        assert_eq!(activations.len(), 1);
        assert!(activations[0].targets.is_neutral());
        assert_eq!(scheduler.queue_len(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.clock().is_reset());

        advance_to(&mut scheduler, &clock, 20_000.0);
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn inactivity_returns_mouth_to_neutral_once() {
        let (mut scheduler, recorder, clock) = build(unblended());
        scheduler.enqueue(vec![event(0, 'a', 100.0), event(1, 'm', 100.0)], 0.0);

        advance_to(&mut scheduler, &clock, 2_900.0);
        assert_eq!(recorder.len(), 2);

        advance_to(&mut scheduler, &clock, 3_200.0);
        let activations = recorder.activations().unwrap();
        assert_eq!(activations.len(), 3);
        assert!(activations[2].targets.is_neutral());
        assert_eq!(scheduler.next_deadline(), None);

        advance_to(&mut scheduler, &clock, 60_000.0);
        assert_eq!(recorder.len(), 3);
    }

    #[test]
    fn watchdog_waits_for_a_long_drain() {
        let (mut scheduler, recorder, clock) = build(unblended());
        scheduler.enqueue(vec![event(0, 'a', 4_000.0)], 0.0);

        advance_to(&mut scheduler, &clock, 6_900.0);
        assert_eq!(recorder.len(), 1);

        advance_to(&mut scheduler, &clock, 7_000.0);
        assert_eq!(recorder.len(), 2);
        assert!(recorder.activations().unwrap()[1].targets.is_neutral());
    }

    #[test]
    fn inter_word_pause_becomes_a_silence_event() {
        let (mut scheduler, _recorder, _clock) = build(AppConfig::default());
        scheduler.process_packet(
            &[
                WordTimestamp::new("ana", 0.0, 0.5),
                WordTimestamp::new("ata", 1.0, 1.5),
            ],
            1,
        );

        let queued: Vec<&VisemeEvent> = scheduler.queued().collect();
        let phonemes: String = queued.iter().map(|e| e.phoneme).collect();
        assert_eq!(phonemes, "aa_aa_");

        let pause = queued[2];
        assert!((pause.duration_ms - 473.0).abs() < 1e-6);
        assert_eq!((pause.audio_start, pause.audio_end), (0.5, 1.0));
    }

    #[test]
    fn small_gaps_are_not_animated() {
        let (mut scheduler, _recorder, _clock) = build(AppConfig::default());
        scheduler.process_packet(
            &[
                WordTimestamp::new("ana", 0.0, 0.5),
                WordTimestamp::new("ata", 0.53, 1.0),
            ],
            1,
        );

        let silences = scheduler.queued().filter(|e| e.is_silence()).count();
        assert_eq!(silences, 1);
    }

    #[test]
    fn pause_between_packets_is_played_as_lead_in() {
        let (mut scheduler, _recorder, clock) = build(unblended());
        scheduler.process_packet(&[WordTimestamp::new("a", 0.0, 0.2)], 1);
        scheduler.poll();

        clock.set(50.0);
        scheduler.process_packet(&[WordTimestamp::new("o", 0.6, 0.8)], 1);

        let queued: Vec<&VisemeEvent> = scheduler.queued().collect();
        let phonemes: String = queued.iter().map(|e| e.phoneme).collect();
        assert_eq!(phonemes, "__o_");
        assert!((queued[1].duration_ms - 400.0).abs() < 1e-6);
    }

    #[test]
    fn overlapping_packet_continues_without_lead_in() {
        let (mut scheduler, _recorder, clock) = build(unblended());
        scheduler.process_packet(&[WordTimestamp::new("a", 0.0, 0.2)], 1);
        scheduler.poll();

        clock.set(50.0);
        scheduler.process_packet(&[WordTimestamp::new("o", 0.1, 0.4)], 1);

        let phonemes: String = scheduler.queued().map(|e| e.phoneme).collect();
        assert_eq!(phonemes, "_o_");
    }

    #[test]
    fn packet_after_idle_waits_for_remaining_gap() {
        let (mut scheduler, recorder, clock) = build(unblended());
        scheduler.process_packet(&[WordTimestamp::new("a", 0.0, 0.2)], 1);
        advance_to(&mut scheduler, &clock, 300.0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        // Drained at 200ms, 1s of audio gap: 900ms remain.
        scheduler.process_packet(&[WordTimestamp::new("o", 1.2, 1.4)], 1);
        let deadline = scheduler.next_deadline().unwrap();
        assert!((deadline - 1_200.0).abs() < 1e-6);

        advance_to(&mut scheduler, &clock, 1_250.0);
        assert_eq!(recorder.phonemes().unwrap(), "a_o");
    }

    #[test]
    fn malformed_timestamps_still_animate() {
        let (mut scheduler, recorder, clock) = build(unblended());
        scheduler.process_packet(
            &[WordTimestamp {
                word: "ana".into(),
                start: Some(f64::NAN),
                end: None,
                confidence: None,
            }],
            1,
        );
        advance_to(&mut scheduler, &clock, 1_000.0);

        assert_eq!(recorder.phonemes().unwrap(), "aa_");
    }

    struct FailingSink {
        calls: Arc<AtomicUsize>,
    }

    impl VisemeSink for FailingSink {
        fn apply_mouth_targets(&mut self, _targets: &MouthTarget) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LipSyncError::Sink("mesh not loaded".into()))
        }
    }

    #[test]
    fn sink_failures_do_not_stall_the_drain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let clock = ManualClock::new();
        let mut scheduler = EventScheduler::new(
            unblended(),
            FailingSink {
                calls: calls.clone(),
            },
            clock.clone(),
        );

        scheduler.enqueue(
            vec![event(0, 'a', 50.0), event(1, 'b', 50.0), event(2, 'a', 50.0)],
            0.0,
        );
        advance_to(&mut scheduler, &clock, 500.0);

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn zero_duration_events_are_repaired() {
        let (mut scheduler, _recorder, _clock) = build(unblended());
        scheduler.enqueue(vec![event(0, 'a', 0.0), event(1, 'o', f64::NAN)], 0.0);

        assert!(scheduler.queued().all(|e| e.duration_ms == 75.0));
    }

    #[test]
    fn shutdown_cancels_timers_and_closes_the_mouth() {
        let (mut scheduler, recorder, clock) = build(unblended());
        scheduler.process_packet(&[WordTimestamp::new("salam", 0.0, 1.0)], 1);
        advance_to(&mut scheduler, &clock, 100.0);

        scheduler.shutdown();

        assert_eq!(scheduler.next_deadline(), None);
        assert_eq!(scheduler.queue_len(), 0);
        let activations = recorder.activations().unwrap();
        assert!(activations.last().unwrap().targets.is_neutral());
    }
}
