//! wavecycle-out - Main entry point
//!
//! Plays a sine tone through the buffer-recycling output engine, optionally
//! pausing half way, then closes the engine and reports its last error.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wavecycle_common::{EngineSettings, OutputBackend};
use wavecycle_out::tone::SineTone;
use wavecycle_out::{CpalDriver, DeviceDriver, OutputEngine, SimulatedDriver, WaveFormat};

/// Command-line arguments for wavecycle-out
#[derive(Parser, Debug)]
#[command(name = "wavecycle-out")]
#[command(about = "Play a test tone through the wavecycle output engine")]
#[command(version)]
struct Args {
    /// Config file (overrides WAVECYCLE_CONFIG and the per-user file)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device backend
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,

    /// Sample rate in Hz (11025, 22050, 44100)
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Bits per sample (8, 16)
    #[arg(long)]
    bit_depth: Option<u16>,

    /// Channel count (1, 2)
    #[arg(long)]
    channels: Option<u16>,

    /// Frames across the whole buffer pool (power of two)
    #[arg(long)]
    buffer_frames: Option<u32>,

    /// Tone frequency in Hz
    #[arg(short, long, default_value = "440")]
    frequency: f32,

    /// Tone amplitude 0.0-1.0
    #[arg(short, long, default_value = "0.3")]
    amplitude: f32,

    /// Playback duration in seconds
    #[arg(short, long, default_value = "3")]
    seconds: u64,

    /// Pause for this many milliseconds half way through
    #[arg(long, default_value = "0")]
    pause_ms: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Cpal,
    Simulated,
}

impl From<Backend> for OutputBackend {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Cpal => OutputBackend::Cpal,
            Backend::Simulated => OutputBackend::Simulated,
        }
    }
}

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let mut settings =
        EngineSettings::load(args.config.as_deref()).context("Failed to load settings")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("wavecycle_out={}", settings.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    apply_overrides(&mut settings, &args);
    let output = &settings.output;

    info!(
        "Starting wavecycle-out: {:?} backend, {} Hz, {} bit, {} ch, {} frames",
        output.backend, output.sample_rate, output.bit_depth, output.channels, output.buffer_frames
    );

    let driver: Arc<dyn DeviceDriver> = match output.backend {
        OutputBackend::Cpal => Arc::new(CpalDriver::new()),
        OutputBackend::Simulated => Arc::new(SimulatedDriver::new()),
    };

    let format = WaveFormat::new(
        output.sample_rate,
        output.bit_depth,
        output.channels,
        output.buffer_frames,
    );
    let tone = SineTone::new(format.spec(), args.frequency, args.amplitude);

    let mut engine = OutputEngine::from_settings(driver, &settings);

    if !engine.open(format.with_renderer(tone)) {
        bail!("Failed to open output engine: {}", engine.last_error());
    }
    if !engine.start() {
        bail!("Failed to start output engine: {}", engine.last_error());
    }

    let total = Duration::from_secs(args.seconds);
    if args.pause_ms > 0 {
        thread::sleep(total / 2);
        engine.pause();
        thread::sleep(Duration::from_millis(args.pause_ms));
        engine.start();
        thread::sleep(total - total / 2);
    } else {
        thread::sleep(total);
    }

    if let Some(code) = engine.worker_fault() {
        warn!("Render worker stopped early: {}", code);
    }
    info!("Rendered {} buffers", engine.renders());

    if !engine.close() {
        bail!("Failed to close output engine: {}", engine.last_error());
    }

    info!("Playback complete");
    Ok(())
}

/// Command-line values take priority over the settings file
fn apply_overrides(settings: &mut EngineSettings, args: &Args) {
    let output = &mut settings.output;
    if let Some(backend) = args.backend {
        output.backend = backend.into();
    }
    if let Some(rate) = args.sample_rate {
        output.sample_rate = rate;
    }
    if let Some(depth) = args.bit_depth {
        output.bit_depth = depth;
    }
    if let Some(channels) = args.channels {
        output.channels = channels;
    }
    if let Some(frames) = args.buffer_frames {
        output.buffer_frames = frames;
    }
}
