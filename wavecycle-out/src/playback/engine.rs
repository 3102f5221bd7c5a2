//! Output engine lifecycle
//!
//! Public state machine around one output session:
//!
//! ```text
//!   Closed ──open──▶ OpenSuspended ──start──▶ Running ◀──start── Paused
//!     ▲                   │                      │ └───pause────▶ │
//!     └──────close────────┴──────────────────────┴────────────────┘
//! ```
//!
//! Every operation returns a bool; failures store an [`ErrorCode`] readable
//! through [`OutputEngine::last_error`]. The code is overwritten by each
//! failure and never cleared.

use crate::audio::{Renderer, SlotArena, StreamSpec, WaveFormat};
use crate::device::{DeviceDriver, OutputDevice};
use crate::error::{DeviceError, ErrorCode};
use crate::playback::worker::{submit_slot, RenderWorker, StopOutcome};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use wavecycle_common::EngineSettings;

/// Default bounded wait for the render worker in `close`
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(1000);

/// Lifecycle state of an output engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No session
    Closed,
    /// Device open and primed, worker not started yet
    OpenSuspended,
    /// Worker recycling slots
    Running,
    /// Worker parked, buffers kept
    Paused,
    /// Last close could not close the device
    Error,
}

/// Starts the render worker of a new session
type WorkerSpawner =
    fn(Arc<SlotArena>, Arc<dyn OutputDevice>, Box<dyn Renderer>) -> io::Result<RenderWorker>;

/// Resources of one open session
struct Session {
    spec: StreamSpec,
    arena: Arc<SlotArena>,
    device: Arc<dyn OutputDevice>,
    worker: RenderWorker,
}

/// Buffer-recycling audio output engine
pub struct OutputEngine {
    driver: Arc<dyn DeviceDriver>,
    spawn_worker: WorkerSpawner,
    shutdown_timeout: Duration,
    state: EngineState,
    last_error: ErrorCode,
    session: Option<Session>,
}

impl OutputEngine {
    /// Engine that opens devices through `driver`
    pub fn new<D: DeviceDriver + 'static>(driver: D) -> Self {
        Self::with_driver(Arc::new(driver))
    }

    /// Engine sharing an existing driver
    pub fn with_driver(driver: Arc<dyn DeviceDriver>) -> Self {
        Self {
            driver,
            spawn_worker: RenderWorker::spawn_suspended,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            state: EngineState::Closed,
            last_error: ErrorCode::Ok,
            session: None,
        }
    }

    /// Engine configured from loaded settings
    pub fn from_settings(driver: Arc<dyn DeviceDriver>, settings: &EngineSettings) -> Self {
        Self::with_driver(driver).with_shutdown_timeout(settings.shutdown_timeout())
    }

    /// How long `close` waits for the render worker before force-stopping it
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[cfg(test)]
    fn with_worker_spawner(mut self, spawner: WorkerSpawner) -> Self {
        self.spawn_worker = spawner;
        self
    }

    /// Open the default device with `format` and prime it with silence.
    ///
    /// The render worker is created suspended; call [`OutputEngine::start`]
    /// to begin recycling. On failure nothing stays acquired.
    pub fn open(&mut self, format: WaveFormat) -> bool {
        match self.try_open(format) {
            Ok(session) => {
                info!(
                    "Output engine open: {} Hz, {} bit, {} ch, {} byte slots via {}",
                    session.spec.sample_rate,
                    session.spec.bit_depth,
                    session.spec.channels,
                    session.arena.slot_len(),
                    self.driver.name()
                );
                self.session = Some(session);
                self.state = EngineState::OpenSuspended;
                true
            }
            Err(code) => {
                self.last_error = code;
                false
            }
        }
    }

    fn try_open(&self, mut format: WaveFormat) -> Result<Session, ErrorCode> {
        if self.session.is_some() {
            warn!("open() called on an open output engine");
            return Err(ErrorCode::AlreadyOpen);
        }

        if let Err(e) = format.validate() {
            warn!("Rejecting wave format {:?}: {}", format, e);
            return Err(e.into());
        }
        let spec = format.spec();
        let renderer = format.renderer.take().ok_or(ErrorCode::InvalidFormat)?;
        let total_bytes = spec.total_bytes().ok_or(ErrorCode::InvalidFormat)?;

        let arena = Arc::new(SlotArena::new(total_bytes));
        debug!(
            "Allocated {} byte arena, {} byte slots",
            total_bytes,
            arena.slot_len()
        );

        let device = self.driver.open(&spec, Arc::clone(&arena)).map_err(|e| {
            error!("Failed to open {} device: {}", self.driver.name(), e);
            e.code()
        })?;

        // From here on a failure must close the device before returning
        if let Err(e) = prime_device(&arena, device.as_ref(), spec.bit_depth) {
            error!("Failed to prime device: {}", e);
            rollback(device.as_ref());
            return Err(e.code());
        }

        let worker = match (self.spawn_worker)(Arc::clone(&arena), Arc::clone(&device), renderer) {
            Ok(worker) => worker,
            Err(e) => {
                error!("Failed to spawn render worker: {}", e);
                rollback(device.as_ref());
                return Err(ErrorCode::ThreadCreateFailed);
            }
        };

        Ok(Session {
            spec,
            arena,
            device,
            worker,
        })
    }

    /// Resume slot recycling. False if no session is open.
    pub fn start(&mut self) -> bool {
        let Some(session) = self.session.as_ref() else {
            debug!("start() without an open session");
            return false;
        };
        session.worker.resume();
        if self.state != EngineState::Running {
            info!("Output engine running");
        }
        self.state = EngineState::Running;
        true
    }

    /// Suspend slot recycling, keeping device and buffers. False if no
    /// session is open.
    pub fn pause(&mut self) -> bool {
        let Some(session) = self.session.as_ref() else {
            debug!("pause() without an open session");
            return false;
        };
        session.worker.suspend();
        if self.state != EngineState::Paused {
            info!("Output engine paused");
        }
        self.state = EngineState::Paused;
        true
    }

    /// Stop the worker, close the device and release all buffers.
    ///
    /// Best-effort: every teardown step runs even if an earlier one failed.
    /// A force-stopped worker records `ThreadAbort` but does not fail the
    /// close; only a device close failure returns false. Safe to call when
    /// already closed.
    pub fn close(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return true;
        };
        info!("Closing output engine");

        let Session {
            arena,
            device,
            worker,
            ..
        } = session;

        match worker.stop(self.shutdown_timeout) {
            StopOutcome::Joined { fault: None } => {}
            StopOutcome::Joined { fault: Some(code) } => {
                warn!("Render worker had stopped earlier on: {}", code);
                self.last_error = code;
            }
            StopOutcome::ForceStopped => {
                self.last_error = ErrorCode::ThreadAbort;
            }
        }

        let mut device_closed = true;
        match device.close() {
            Ok(()) => {}
            Err(e @ DeviceError::SignalRelease(_)) => {
                warn!("Device closed with warning: {}", e);
                self.last_error = e.code();
            }
            Err(e) => {
                error!("Failed to close device: {}", e);
                self.last_error = e.code();
                device_closed = false;
            }
        }

        // Last engine-side owners; an abandoned worker may still hold a share
        drop(device);
        drop(arena);

        self.state = if device_closed {
            EngineState::Closed
        } else {
            EngineState::Error
        };
        info!("Output engine closed");
        device_closed
    }

    /// Most recent failure
    pub fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// True while a session exists
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Device failure the render worker died on, while the session is open
    pub fn worker_fault(&self) -> Option<ErrorCode> {
        self.session.as_ref().and_then(|s| s.worker.fault())
    }

    /// Completed render calls of the current session
    pub fn renders(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.worker.renders())
    }

    /// Slot length in bytes of the current session
    pub fn slot_len(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.arena.slot_len())
    }

    /// Stream layout of the current session
    pub fn spec(&self) -> Option<StreamSpec> {
        self.session.as_ref().map(|s| s.spec)
    }
}

impl Drop for OutputEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fill every slot with silence and submit it once
fn prime_device(arena: &SlotArena, device: &dyn OutputDevice, bit_depth: u16) -> Result<(), DeviceError> {
    // 8-bit PCM is unsigned: silence is the midpoint
    let silence = if bit_depth == 8 { 0x80 } else { 0x00 };

    for slot in arena.slots() {
        arena.with_free_slot(slot.index, |bytes| bytes.fill(silence));
        submit_slot(arena, device, *slot)?;
    }
    Ok(())
}

/// Close a device acquired by a failed open
fn rollback(device: &dyn OutputDevice) {
    if let Err(e) = device.close() {
        warn!("Device close during open rollback failed: {}", e);
    }
}
