//! Timer services that drive an [`EventScheduler`].
//!
//! [`replay`] runs a recorded transcript through the scheduler on a
//! [`ManualClock`] as fast as possible, which is what tests and the
//! command-line tool use. [`spawn`] runs the scheduler live on a tokio task,
//! sleeping until the next deadline between packets.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info};

use crate::{
    config::AppConfig,
    render::VisemeSink,
    scheduler::EventScheduler,
    timeline::{Clock, ManualClock},
    transcript::{Packet, WordTimestamp},
    LipSyncError, Result,
};

/// A packet together with the wall time (relative to the start of the
/// replay) at which it arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedPacket {
    #[serde(default)]
    pub at_ms: f64,
    #[serde(flatten)]
    pub packet: Packet,
}

impl TimedPacket {
    pub fn new(at_ms: f64, packet: Packet) -> Self {
        Self { at_ms, packet }
    }
}

/// Parses a replay script: a JSON array of [`TimedPacket`]s.
pub fn parse_script(json: &str) -> Result<Vec<TimedPacket>> {
    Ok(serde_json::from_str(json)?)
}

/// Fires every deadline up to and including `until`, moving `clock` along
/// with them so each firing observes its own deadline as "now".
pub fn advance_to<S: VisemeSink>(
    scheduler: &mut EventScheduler<S, ManualClock>,
    clock: &ManualClock,
    until: f64,
) {
    while let Some(deadline) = scheduler.next_deadline() {
        if deadline > until {
            break;
        }
        clock.set(deadline.max(clock.now_ms()));
        scheduler.poll();
    }
    clock.set(until.max(clock.now_ms()));
    scheduler.poll();
}

/// Fires deadlines until nothing is armed any more.
pub fn drain<S: VisemeSink>(scheduler: &mut EventScheduler<S, ManualClock>, clock: &ManualClock) {
    while let Some(deadline) = scheduler.next_deadline() {
        advance_to(scheduler, clock, deadline);
    }
}

/// Replays `packets` in arrival order on a simulated clock and returns the
/// scheduler once every timer, including the inactivity watchdog, has run.
pub fn replay<S: VisemeSink>(
    packets: &[TimedPacket],
    config: AppConfig,
    sink: S,
    clock: ManualClock,
) -> EventScheduler<S, ManualClock> {
    let mut ordered: Vec<&TimedPacket> = packets.iter().collect();
    ordered.sort_by(|a, b| a.at_ms.total_cmp(&b.at_ms));

    let mut scheduler = EventScheduler::new(config, sink, clock.clone());
    for timed in ordered {
        advance_to(&mut scheduler, &clock, timed.at_ms);
        scheduler.process(&timed.packet);
        scheduler.poll();
    }
    drain(&mut scheduler, &clock);
    scheduler
}

/// Longest single sleep the live driver will schedule.
pub const MAX_SLEEP: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Monotonic clock backed by `tokio::time`, so paused test time applies.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Instant at which [`Clock::now_ms`] will have reached `ms`. Rounded up
    /// so a timer woken at this instant always sees its deadline as due.
    /// Deadlines beyond [`MAX_SLEEP`] are clamped to it; the driver simply
    /// wakes, finds nothing due and sleeps again.
    pub fn instant_at(&self, ms: f64) -> Instant {
        let cap = MAX_SLEEP.as_micros() as f64;
        let micros = (ms.max(0.0) * 1000.0).ceil().min(cap) as u64;
        self.origin + Duration::from_micros(micros.saturating_add(1))
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

#[derive(Debug)]
enum Command {
    Packet(Packet),
    Flush,
    Shutdown,
}

/// Cloneable producer side of a live scheduler task.
#[derive(Debug, Clone)]
pub struct LipSyncHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl LipSyncHandle {
    pub fn process_packet(&self, words: Vec<WordTimestamp>, sequence_id: u64) -> Result<()> {
        self.send(Packet::new(sequence_id, words))
    }

    pub fn send(&self, packet: Packet) -> Result<()> {
        self.command(Command::Packet(packet))
    }

    pub fn flush(&self) -> Result<()> {
        self.command(Command::Flush)
    }

    /// Asks the task to tear the scheduler down and exit.
    pub fn shutdown(&self) -> Result<()> {
        self.command(Command::Shutdown)
    }

    fn command(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| LipSyncError::msg("lip sync driver has stopped"))
    }
}

/// Starts a scheduler on its own tokio task. The task exits when
/// [`LipSyncHandle::shutdown`] is called or every handle is dropped.
pub fn spawn<S>(config: AppConfig, sink: S) -> (LipSyncHandle, JoinHandle<()>)
where
    S: VisemeSink + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = EventScheduler::new(config, sink, TokioClock::start());
    let handle = tokio::spawn(drive(scheduler, rx));
    (LipSyncHandle { tx }, handle)
}

async fn drive<S: VisemeSink>(
    mut scheduler: EventScheduler<S, TokioClock>,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    info!("lip sync driver started");
    loop {
        let deadline = scheduler
            .next_deadline()
            .map(|ms| scheduler.time_source().instant_at(ms));

        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Packet(packet)) => {
                    scheduler.poll();
                    scheduler.process(&packet);
                    scheduler.poll();
                }
                Some(Command::Flush) => scheduler.flush(),
                Some(Command::Shutdown) | None => break,
            },
            _ = sleep_until_deadline(deadline) => {
                let fired = scheduler.poll();
                debug!(fired, "timer wake-up");
            }
        }
    }
    scheduler.shutdown();
    info!("lip sync driver stopped");
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
