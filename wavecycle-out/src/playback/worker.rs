//! Render worker
//!
//! A single background thread that recycles slots:
//!
//! 1. park while suspended (paused or not yet started)
//! 2. block, without timeout, on the device completion wait
//! 3. scan slots 0..N-1; for every Done slot: reclaim it, render into it,
//!    resubmit it, before moving on to the next slot
//! 4. repeat while alive
//!
//! A failing reclaim or submit is fatal: the worker records the error code
//! in its fault cell and exits. It is never restarted.
//!
//! Stopping is cooperative (alive flag plus gate release) with a bounded
//! wait. A worker that does not exit in time is force-stopped, see
//! [`RenderWorker::stop`].

use crate::audio::{Renderer, SlotArena, SlotRef};
use crate::device::OutputDevice;
use crate::error::{DeviceError, ErrorCode};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Pause gate: the worker parks here while suspended
#[derive(Debug)]
struct SuspendGate {
    suspended: Mutex<bool>,
    condvar: Condvar,
}

impl SuspendGate {
    fn new(suspended: bool) -> Self {
        Self {
            suspended: Mutex::new(suspended),
            condvar: Condvar::new(),
        }
    }

    fn set(&self, suspended: bool) {
        let mut guard = self.suspended.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = suspended;
        if !suspended {
            self.condvar.notify_all();
        }
    }

    fn wait_while_suspended(&self) {
        let mut guard = self.suspended.lock().unwrap_or_else(PoisonError::into_inner);
        while *guard {
            guard = self
                .condvar
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// State shared between the controller and the worker thread
#[derive(Debug)]
struct WorkerShared {
    /// Loop condition. Written by the controller (Release), read by the worker (Acquire).
    alive: AtomicBool,
    gate: SuspendGate,
    /// ErrorCode that made the worker exit, `Ok` while healthy
    fault: AtomicU32,
    /// Completed render calls
    renders: AtomicU64,
}

impl WorkerShared {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn record_fault(&self, code: ErrorCode) {
        self.fault.store(code.as_u32(), Ordering::Release);
    }

    fn fault(&self) -> Option<ErrorCode> {
        match ErrorCode::from_u32(self.fault.load(Ordering::Acquire)) {
            Some(ErrorCode::Ok) | None => None,
            Some(code) => Some(code),
        }
    }
}

/// How a worker stop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Thread exited within the timeout; `fault` is set if it had died on a
    /// device failure before the stop request
    Joined { fault: Option<ErrorCode> },
    /// Thread did not exit in time and was abandoned
    ForceStopped,
}

/// Handle to the render worker thread
pub struct RenderWorker {
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
    /// Disconnects when the worker closure returns or unwinds
    exited: Receiver<()>,
}

impl RenderWorker {
    /// Spawn the worker in the suspended state; [`RenderWorker::resume`] starts it.
    pub fn spawn_suspended(
        arena: Arc<SlotArena>,
        device: Arc<dyn OutputDevice>,
        renderer: Box<dyn Renderer>,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(WorkerShared {
            alive: AtomicBool::new(true),
            gate: SuspendGate::new(true),
            fault: AtomicU32::new(ErrorCode::Ok.as_u32()),
            renders: AtomicU64::new(0),
        });
        let (exit_guard, exited) = mpsc::channel::<()>();

        let handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("wavecycle-render".to_string())
                .spawn(move || {
                    let _exit_guard = exit_guard;
                    run(&shared, &arena, device.as_ref(), renderer);
                })?
        };

        Ok(Self {
            shared,
            handle: Some(handle),
            exited,
        })
    }

    /// Let the worker run
    pub fn resume(&self) {
        self.shared.gate.set(false);
    }

    /// Park the worker before its next slot. A render call in flight completes.
    pub fn suspend(&self) {
        self.shared.gate.set(true);
    }

    /// Failure the worker died on, if any
    pub fn fault(&self) -> Option<ErrorCode> {
        self.shared.fault()
    }

    /// Number of completed render calls
    pub fn renders(&self) -> u64 {
        self.shared.renders.load(Ordering::Relaxed)
    }

    /// Stop the worker: clear alive, release the gate, wait up to `timeout`.
    ///
    /// If the worker has not exited by then it is force-stopped.
    pub fn stop(mut self, timeout: Duration) -> StopOutcome {
        self.shared.alive.store(false, Ordering::Release);
        self.shared.gate.set(false);

        let exited = match self.exited.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            // the worker never sends; any message would be a bug, treat as exited
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };

        let Some(handle) = self.handle.take() else {
            return StopOutcome::Joined { fault: self.fault() };
        };

        if exited {
            if handle.join().is_err() {
                error!("Render worker panicked");
            } else {
                debug!("Render worker joined successfully");
            }
            StopOutcome::Joined { fault: self.fault() }
        } else {
            Self::force_stop(handle);
            StopOutcome::ForceStopped
        }
    }

    /// Abandon a worker that ignored the stop request.
    ///
    /// Best-effort and unsafe in spirit: the thread keeps running whatever
    /// call it is stuck in (usually the renderer). It still owns shared
    /// references to the arena and device, so memory stays valid, and it
    /// exits on its own once the closed device rejects its next submit.
    fn force_stop(handle: JoinHandle<()>) {
        let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
        error!(
            "Render worker '{}' did not exit in time, abandoning it (state may be inconsistent)",
            name
        );
        drop(handle);
    }
}

/// Worker thread body
fn run(
    shared: &WorkerShared,
    arena: &SlotArena,
    device: &dyn OutputDevice,
    mut renderer: Box<dyn Renderer>,
) {
    debug!("Render worker started");

    'outer: loop {
        shared.gate.wait_while_suspended();
        if !shared.is_alive() {
            break;
        }

        // Sole suspension point besides the gate: no timeout, no polling
        device.wait_for_completion(None);
        if !shared.is_alive() {
            break;
        }

        for slot in arena.slots() {
            if !arena.is_done(slot.index) {
                continue;
            }

            shared.gate.wait_while_suspended();
            if !shared.is_alive() {
                break 'outer;
            }

            if let Err(e) = recycle(arena, device, renderer.as_mut(), *slot) {
                error!("Render worker stopping on device failure: {}", e);
                shared.record_fault(e.code());
                return;
            }
            shared.renders.fetch_add(1, Ordering::Relaxed);
        }
    }

    debug!("Render worker exiting");
}

/// Reclaim a Done slot, render into it and resubmit it
fn recycle(
    arena: &SlotArena,
    device: &dyn OutputDevice,
    renderer: &mut dyn Renderer,
    slot: SlotRef,
) -> Result<(), DeviceError> {
    device.reclaim(slot)?;
    arena.mark_free(slot.index).map_err(|e| DeviceError::Reclaim {
        slot: slot.index,
        reason: e.to_string(),
    })?;

    trace!("Rendering slot {} ({} bytes)", slot.index, slot.len);
    arena.with_free_slot(slot.index, |bytes| renderer.render(bytes));

    submit_slot(arena, device, slot)
}

/// Mark a Free slot Submitted and hand it to the device.
///
/// The status is rolled back if the device refuses the slot.
pub(crate) fn submit_slot(
    arena: &SlotArena,
    device: &dyn OutputDevice,
    slot: SlotRef,
) -> Result<(), DeviceError> {
    arena.mark_submitted(slot.index).map_err(|e| DeviceError::Submit {
        slot: slot.index,
        reason: e.to_string(),
    })?;

    if let Err(e) = device.submit(slot) {
        if arena.revoke_submission(slot.index).is_err() {
            warn!("Slot {} changed state during failed submit", slot.index);
        }
        return Err(e);
    }
    Ok(())
}
