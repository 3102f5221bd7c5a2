//! # wavecycle Audio Output Library (wavecycle-out)
//!
//! Buffer-recycling audio output engine.
//!
//! **Purpose:** Keep an audio output device fed from a caller-supplied
//! renderer without gaps, on a dedicated worker thread, while the caller
//! stays free to do other work.
//!
//! **Architecture:** four slots carved from one 16-byte aligned allocation
//! circulate between the engine and a device adapter. The render worker
//! waits for the device to finish a slot, reclaims it, lets the renderer
//! refill it and resubmits it.
//!
//! ```no_run
//! use wavecycle_out::{CpalDriver, OutputEngine, WaveFormat};
//!
//! let mut engine = OutputEngine::new(CpalDriver::new());
//! let format = WaveFormat::new(44100, 16, 2, 4096)
//!     .with_renderer(|buffer: &mut [u8]| buffer.fill(0));
//!
//! if !engine.open(format) || !engine.start() {
//!     eprintln!("audio output failed: {}", engine.last_error());
//! }
//! ```

pub mod audio;
pub mod device;
pub mod error;
pub mod playback;
pub mod tone;

pub use audio::{Renderer, StreamSpec, WaveFormat};
pub use device::{CpalDriver, DeviceDriver, OutputDevice, SimulatedDriver};
pub use error::{DeviceError, ErrorCode, FormatError};
pub use playback::{EngineState, OutputEngine};
