//! Core library for driving character lip sync from streamed speech
//! recognition.
//!
//! Recognized words arrive in packets with audio-relative timestamps. The
//! crate turns them into timed mouth-shape activations: [`segment`] splits
//! words into visemes, [`timeline`] reconciles audio time with wall-clock
//! time, [`session`] discards abandoned utterances, and [`scheduler`] drains
//! the resulting queue into a [`VisemeSink`] supplied by the renderer.

pub mod config;
pub mod error;
pub mod mapping;
pub mod record;
pub mod render;
pub mod runtime;
pub mod scheduler;
pub mod segment;
pub mod session;
pub mod timeline;
pub mod transcript;

pub use config::{AppConfig, SchedulerConfig, SegmenterConfig};
pub use error::{LipSyncError, Result};
pub use mapping::{targets_for, MorphWeight, MouthTarget, SILENCE};
pub use record::{Activation, RecordingSink};
pub use render::{TracingSink, VisemeSink};
pub use runtime::{replay, spawn, LipSyncHandle, TimedPacket, TokioClock};
pub use scheduler::{EventScheduler, SchedulerState, VisemeEvent};
pub use segment::{Segment, WordSegmenter};
pub use session::{should_flush, SessionTracker};
pub use timeline::{to_wall_clock_delay, Clock, ManualClock, SchedulerClock};
pub use transcript::{Packet, WordTimestamp};
