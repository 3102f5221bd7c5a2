//! Device adapter contract
//!
//! The output engine never talks to an audio API directly. It opens an
//! [`OutputDevice`] through a [`DeviceDriver`] and then only submits slots,
//! reclaims finished slots, waits for completions and closes the device.
//!
//! Slot status bookkeeping in the [`SlotArena`] is split between both sides:
//! the engine marks a slot Submitted before `submit` and Free after `reclaim`;
//! the device reads it through [`SlotArena::begin_playback`] and finishes the
//! returned guard (then notifies its completion signal) once the slot has
//! been played.
//!
//! Implementations:
//! - [`output::CpalDriver`]: system default output device via cpal
//! - [`simulated::SimulatedDriver`]: clock-driven device without hardware

pub mod output;
pub mod signal;
pub mod simulated;

use crate::audio::{SlotArena, SlotRef, StreamSpec};
use crate::error::DeviceResult;
use std::sync::Arc;
use std::time::Duration;

pub use output::CpalDriver;
pub use signal::CompletionSignal;
pub use simulated::{SimulatedDriver, SimulatedProbe};

/// Opens output devices
pub trait DeviceDriver: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &str;

    /// Open the device for `spec`. The device reads slot memory from `arena`.
    fn open(&self, spec: &StreamSpec, arena: Arc<SlotArena>) -> DeviceResult<Arc<dyn OutputDevice>>;
}

/// An open output device.
///
/// Shared between the engine (open/close) and the render worker
/// (submit/reclaim/wait), hence `&self` everywhere.
pub trait OutputDevice: Send + Sync {
    /// Queue a slot already marked Submitted for playback
    fn submit(&self, slot: SlotRef) -> DeviceResult<()>;

    /// Release a Done slot back to the engine
    fn reclaim(&self, slot: SlotRef) -> DeviceResult<()>;

    /// Block until at least one submitted slot completed.
    ///
    /// `None` waits without timeout. Returns false on timeout.
    fn wait_for_completion(&self, timeout: Option<Duration>) -> bool;

    /// Stop playback and release the device. Wakes any completion waiter.
    fn close(&self) -> DeviceResult<()>;
}
