//! Test helper modules for wavecycle-out integration tests
//!
//! Provides reusable test infrastructure components:
//! - RenderLog: records every render call made by the worker
//! - Engine/driver builders backed by the simulated device

#![allow(dead_code)]

pub mod render_log;

pub use render_log::{wait_until, RenderLog};

use std::sync::Arc;
use std::time::Duration;
use wavecycle_out::{OutputEngine, SimulatedDriver, WaveFormat};

/// Per-slot playback time of the fast simulated device
pub const FAST_SLOT: Duration = Duration::from_millis(2);

/// Simulated driver playing each slot for [`FAST_SLOT`]
pub fn fast_driver() -> SimulatedDriver {
    SimulatedDriver::new().with_slot_duration(FAST_SLOT)
}

/// Engine over `driver` with a short shutdown timeout
pub fn engine_with(driver: SimulatedDriver, shutdown_timeout: Duration) -> OutputEngine {
    OutputEngine::new(driver).with_shutdown_timeout(shutdown_timeout)
}

/// Format whose renderer records into `log`
pub fn logged_format(
    sample_rate: u32,
    bit_depth: u16,
    channels: u16,
    buffer_frames: u32,
    log: &Arc<RenderLog>,
) -> WaveFormat {
    WaveFormat::new(sample_rate, bit_depth, channels, buffer_frames)
        .with_renderer(RenderLog::renderer(Arc::clone(log)))
}

/// 44.1kHz, 16 bit, stereo, 512 frames (512 byte slots)
pub fn standard_format(log: &Arc<RenderLog>) -> WaveFormat {
    logged_format(44100, 16, 2, 512, log)
}
