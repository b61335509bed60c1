use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use lipsync_core::{
    runtime::parse_script, targets_for, AppConfig, LipSyncError, ManualClock, RecordingSink,
    TimedPacket, TracingSink, WordSegmenter,
};
use tracing_subscriber::EnvFilter;

fn main() -> lipsync_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            script,
            config,
            realtime,
        } => {
            let config = load_config(config.as_ref())?;
            let packets = parse_script(&std::fs::read_to_string(&script)?)?;
            tracing::info!(?script, packets = packets.len(), realtime, "replaying transcript");
            if realtime {
                run_realtime(packets, config)
            } else {
                run_offline(&packets, config)
            }
        }
        Commands::Segment {
            word,
            start,
            end,
            final_word,
            config,
        } => {
            let config = load_config(config.as_ref())?;
            let segmenter = WordSegmenter::new(config.segmenter);
            let segments = if final_word {
                segmenter.segment_final(&word, start, end)
            } else {
                segmenter.segment(&word, start, end)
            };
            for segment in &segments {
                println!("{}", serde_json::to_string(segment)?);
            }
            Ok(())
        }
        Commands::Targets { character } => {
            println!("{}", serde_json::to_string_pretty(&targets_for(character))?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> lipsync_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::debug!(?path, "loading configuration");
            AppConfig::load(path)
        }
        None => Ok(AppConfig::live_defaults()),
    }
}

/// Runs the script on a simulated clock and prints every activation as a JSON
/// line.
fn run_offline(packets: &[TimedPacket], config: AppConfig) -> lipsync_core::Result<()> {
    let clock = ManualClock::new();
    let recorder = RecordingSink::with_clock(clock.clone());
    let scheduler = lipsync_core::replay(packets, config, recorder.clone(), clock);

    for activation in recorder.activations()? {
        println!("{}", serde_json::to_string(&activation)?);
    }
    tracing::info!(
        activations = recorder.len(),
        sessions_flushed = scheduler.sessions().flushes(),
        "replay finished"
    );
    Ok(())
}

/// Feeds the script to a live scheduler at its recorded arrival times and logs
/// activations through `tracing`.
fn run_realtime(mut packets: Vec<TimedPacket>, config: AppConfig) -> lipsync_core::Result<()> {
    packets.sort_by(|a, b| a.at_ms.total_cmp(&b.at_ms));
    let settle_ms = config.scheduler.inactivity_timeout_ms + last_audio_ms(&packets);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()?;

    runtime.block_on(async move {
        let start = tokio::time::Instant::now();
        let (handle, task) = lipsync_core::spawn(config, TracingSink);

        for timed in packets {
            let at = start + Duration::from_secs_f64(timed.at_ms.max(0.0) / 1000.0);
            tokio::time::sleep_until(at).await;
            handle.send(timed.packet)?;
        }

        tokio::time::sleep(Duration::from_secs_f64(settle_ms / 1000.0)).await;
        handle.shutdown()?;
        task.await
            .map_err(|err| LipSyncError::msg(format!("lip sync driver panicked: {err}")))
    })
}

fn last_audio_ms(packets: &[TimedPacket]) -> f64 {
    packets
        .iter()
        .flat_map(|timed| &timed.packet.words)
        .filter_map(|word| word.end)
        .filter(|end| end.is_finite())
        .fold(0.0, f64::max)
        * 1000.0
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive mouth visemes from timed transcripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a JSON transcript script through the scheduler.
    Replay {
        /// JSON array of packets, each with an optional `atMs` arrival time.
        script: PathBuf,
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Run on the wall clock instead of a simulated one.
        #[arg(long)]
        realtime: bool,
    },
    /// Show how a single word is split into visemes.
    Segment {
        word: String,
        /// Word start, seconds of audio.
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        /// Word end, seconds of audio.
        #[arg(long, default_value_t = 0.0)]
        end: f64,
        /// Treat the word as the last one of its packet.
        #[arg(long)]
        final_word: bool,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the morph weights for one character.
    Targets { character: char },
}
