//! Simulated output device
//!
//! Plays submitted slots against a clock instead of hardware: a playback
//! thread takes slots in submission order, holds each for its playback
//! duration, reads its bytes through a [`PlayingSlot`](crate::audio::PlayingSlot)
//! guard, finishes it and notifies the completion signal. Used by the test-suite and by `wavecycle-out --backend simulated`.
//!
//! Faults can be injected at every contract step, and a shared
//! [`SimulatedProbe`] records what the engine did to the device.

use crate::audio::{SlotArena, SlotRef, SlotStatus, StreamSpec};
use crate::device::{CompletionSignal, DeviceDriver, OutputDevice};
use crate::error::{DeviceError, DeviceResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Fault injection and timing options
#[derive(Debug, Clone, Default)]
struct SimulatedConfig {
    /// Fixed per-slot playback time; `None` derives it from the stream spec
    slot_duration: Option<Duration>,
    fail_open: bool,
    fail_signal: bool,
    fail_close: bool,
    fail_signal_release: bool,
    /// Fail every submit after this many successful ones
    fail_submit_after: Option<u64>,
    /// Fail every reclaim after this many successful ones
    fail_reclaim_after: Option<u64>,
}

/// Observations shared between the driver, its devices and the test
#[derive(Debug, Default)]
pub struct SimulatedProbe {
    opens: AtomicUsize,
    closes: AtomicUsize,
    open_devices: AtomicUsize,
    submits: AtomicU64,
    reclaims: AtomicU64,
    completions: AtomicU64,
    bytes_played: AtomicU64,
    /// Submits of a slot not marked Submitted, or already queued
    violations: AtomicU64,
    /// Submits refused because the device was closed
    rejected_after_close: AtomicU64,
    /// Slot indices in submission order
    submit_log: Mutex<Vec<usize>>,
}

impl SimulatedProbe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Devices opened and not yet closed
    pub fn open_devices(&self) -> usize {
        self.open_devices.load(Ordering::SeqCst)
    }

    pub fn submits(&self) -> u64 {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn reclaims(&self) -> u64 {
        self.reclaims.load(Ordering::SeqCst)
    }

    pub fn completions(&self) -> u64 {
        self.completions.load(Ordering::SeqCst)
    }

    pub fn bytes_played(&self) -> u64 {
        self.bytes_played.load(Ordering::SeqCst)
    }

    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn rejected_after_close(&self) -> u64 {
        self.rejected_after_close.load(Ordering::SeqCst)
    }

    /// Copy of the submission order log
    pub fn submit_log(&self) -> Vec<usize> {
        self.submit_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Driver for simulated devices
#[derive(Debug, Clone, Default)]
pub struct SimulatedDriver {
    config: SimulatedConfig,
    probe: Arc<SimulatedProbe>,
}

impl SimulatedDriver {
    /// Real-time simulated device (slot duration follows the stream spec)
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every slot for `duration` instead of its real playback time
    pub fn with_slot_duration(mut self, duration: Duration) -> Self {
        self.config.slot_duration = Some(duration);
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.config.fail_open = true;
        self
    }

    pub fn fail_signal(mut self) -> Self {
        self.config.fail_signal = true;
        self
    }

    pub fn fail_close(mut self) -> Self {
        self.config.fail_close = true;
        self
    }

    pub fn fail_signal_release(mut self) -> Self {
        self.config.fail_signal_release = true;
        self
    }

    pub fn fail_submit_after(mut self, successes: u64) -> Self {
        self.config.fail_submit_after = Some(successes);
        self
    }

    pub fn fail_reclaim_after(mut self, successes: u64) -> Self {
        self.config.fail_reclaim_after = Some(successes);
        self
    }

    /// Shared observation handle
    pub fn probe(&self) -> Arc<SimulatedProbe> {
        Arc::clone(&self.probe)
    }
}

impl DeviceDriver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&self, spec: &StreamSpec, arena: Arc<SlotArena>) -> DeviceResult<Arc<dyn OutputDevice>> {
        if self.config.fail_open {
            return Err(DeviceError::Open("injected open failure".to_string()));
        }
        if self.config.fail_signal {
            return Err(DeviceError::Signal("injected signal failure".to_string()));
        }

        let slot_duration = self.config.slot_duration.unwrap_or_else(|| {
            let seconds = arena.slot_len() as f64 / spec.bytes_per_second() as f64;
            Duration::from_secs_f64(seconds)
        });

        debug!(
            "Opening simulated device: slot_len={} bytes, slot_duration={:?}",
            arena.slot_len(),
            slot_duration
        );

        let shared = Arc::new(SimShared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            closed: AtomicBool::new(false),
        });
        let signal = Arc::new(CompletionSignal::new());

        let thread = {
            let shared = Arc::clone(&shared);
            let signal = Arc::clone(&signal);
            let arena = Arc::clone(&arena);
            let probe = Arc::clone(&self.probe);
            thread::Builder::new()
                .name("wavecycle-sim".to_string())
                .spawn(move || playback_loop(shared, arena, signal, probe, slot_duration))
                .map_err(|e| DeviceError::Open(format!("Failed to spawn playback thread: {}", e)))?
        };

        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        self.probe.open_devices.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(SimulatedDevice {
            config: self.config.clone(),
            probe: Arc::clone(&self.probe),
            arena,
            shared,
            signal,
            thread: Mutex::new(Some(thread)),
        }))
    }
}

/// State shared with the playback thread
struct SimShared {
    queue: Mutex<VecDeque<usize>>,
    condvar: Condvar,
    closed: AtomicBool,
}

/// Open simulated device
struct SimulatedDevice {
    config: SimulatedConfig,
    probe: Arc<SimulatedProbe>,
    arena: Arc<SlotArena>,
    shared: Arc<SimShared>,
    signal: Arc<CompletionSignal>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl OutputDevice for SimulatedDevice {
    fn submit(&self, slot: SlotRef) -> DeviceResult<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            self.probe.rejected_after_close.fetch_add(1, Ordering::SeqCst);
            return Err(DeviceError::Submit {
                slot: slot.index,
                reason: "device closed".to_string(),
            });
        }
        if let Some(limit) = self.config.fail_submit_after {
            if self.probe.submits() >= limit {
                return Err(DeviceError::Submit {
                    slot: slot.index,
                    reason: "injected submit failure".to_string(),
                });
            }
        }

        let mut queue = self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if self.arena.status(slot.index) != SlotStatus::Submitted || queue.contains(&slot.index) {
            warn!("Slot {} submitted out of order", slot.index);
            self.probe.violations.fetch_add(1, Ordering::SeqCst);
        }
        queue.push_back(slot.index);
        self.shared.condvar.notify_one();
        drop(queue);

        self.probe
            .submit_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(slot.index);
        self.probe.submits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reclaim(&self, slot: SlotRef) -> DeviceResult<()> {
        if let Some(limit) = self.config.fail_reclaim_after {
            if self.probe.reclaims() >= limit {
                return Err(DeviceError::Reclaim {
                    slot: slot.index,
                    reason: "injected reclaim failure".to_string(),
                });
            }
        }
        if !self.arena.is_done(slot.index) {
            return Err(DeviceError::Reclaim {
                slot: slot.index,
                reason: "slot still playing".to_string(),
            });
        }
        self.probe.reclaims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        self.signal.wait(timeout)
    }

    fn close(&self) -> DeviceResult<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let _queue = self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            self.shared.condvar.notify_all();
        }

        let thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }

        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.probe.open_devices.fetch_sub(1, Ordering::SeqCst);
        debug!("Simulated device closed");

        // Release a worker still blocked on the completion wait
        self.signal.notify();

        if self.config.fail_close {
            return Err(DeviceError::Close("injected close failure".to_string()));
        }
        if self.config.fail_signal_release {
            return Err(DeviceError::SignalRelease("injected release failure".to_string()));
        }
        Ok(())
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Playback thread: one slot at a time, in submission order
fn playback_loop(
    shared: Arc<SimShared>,
    arena: Arc<SlotArena>,
    signal: Arc<CompletionSignal>,
    probe: Arc<SimulatedProbe>,
    slot_duration: Duration,
) {
    loop {
        let index = {
            let mut queue = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if shared.closed.load(Ordering::Acquire) {
                    return;
                }
                if let Some(index) = queue.pop_front() {
                    break index;
                }
                queue = shared
                    .condvar
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        // "Play" the slot: hold it for its duration, interruptible by close
        {
            let queue = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let (_queue, _) = shared
                .condvar
                .wait_timeout_while(queue, slot_duration, |_| {
                    !shared.closed.load(Ordering::Acquire)
                })
                .unwrap_or_else(PoisonError::into_inner);
        }
        if shared.closed.load(Ordering::Acquire) {
            return;
        }

        let Some(playing) = arena.begin_playback(index) else {
            warn!("Slot {} was not submitted when its turn came", index);
            continue;
        };
        probe
            .bytes_played
            .fetch_add(playing.bytes().len() as u64, Ordering::SeqCst);
        playing.finish();

        probe.completions.fetch_add(1, Ordering::SeqCst);
        trace!("Simulated device finished slot {}", index);
        signal.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> StreamSpec {
        StreamSpec {
            sample_rate: 44100,
            bit_depth: 16,
            channels: 2,
            buffer_frames: 512,
        }
    }

    #[test]
    fn test_submitted_slot_completes() {
        let driver = SimulatedDriver::new().with_slot_duration(Duration::from_millis(2));
        let probe = driver.probe();
        let arena = Arc::new(SlotArena::new(2048));
        let device = driver.open(&spec(), Arc::clone(&arena)).unwrap();

        arena.mark_submitted(1).unwrap();
        device.submit(arena.slot(1)).unwrap();

        assert!(device.wait_for_completion(Some(Duration::from_secs(2))));
        assert!(arena.is_done(1));
        device.reclaim(arena.slot(1)).unwrap();

        assert_eq!(probe.submit_log(), vec![1]);
        assert_eq!(probe.bytes_played(), 512);
        assert_eq!(probe.violations(), 0);

        device.close().unwrap();
        assert_eq!(probe.open_devices(), 0);
    }

    #[test]
    fn test_unmarked_submit_is_violation() {
        let driver = SimulatedDriver::new().with_slot_duration(Duration::from_secs(10));
        let probe = driver.probe();
        let arena = Arc::new(SlotArena::new(2048));
        let device = driver.open(&spec(), Arc::clone(&arena)).unwrap();

        device.submit(arena.slot(0)).unwrap();
        assert_eq!(probe.violations(), 1);
        device.close().unwrap();
    }

    #[test]
    fn test_reclaim_before_done_fails() {
        let driver = SimulatedDriver::new().with_slot_duration(Duration::from_secs(10));
        let arena = Arc::new(SlotArena::new(2048));
        let device = driver.open(&spec(), Arc::clone(&arena)).unwrap();

        arena.mark_submitted(0).unwrap();
        device.submit(arena.slot(0)).unwrap();
        assert!(matches!(
            device.reclaim(arena.slot(0)),
            Err(DeviceError::Reclaim { slot: 0, .. })
        ));
        device.close().unwrap();
    }

    #[test]
    fn test_close_wakes_waiter_and_rejects_submit() {
        let driver = SimulatedDriver::new().with_slot_duration(Duration::from_secs(10));
        let probe = driver.probe();
        let arena = Arc::new(SlotArena::new(2048));
        let device = driver.open(&spec(), Arc::clone(&arena)).unwrap();

        let waiter = {
            let device = Arc::clone(&device);
            thread::spawn(move || device.wait_for_completion(None))
        };
        thread::sleep(Duration::from_millis(10));
        device.close().unwrap();
        assert!(waiter.join().unwrap());

        arena.mark_submitted(0).unwrap();
        assert!(device.submit(arena.slot(0)).is_err());
        assert_eq!(probe.rejected_after_close(), 1);
    }

    #[test]
    fn test_injected_failures() {
        let arena = Arc::new(SlotArena::new(2048));
        assert!(matches!(
            SimulatedDriver::new().fail_open().open(&spec(), Arc::clone(&arena)),
            Err(DeviceError::Open(_))
        ));

        let device = SimulatedDriver::new()
            .fail_close()
            .open(&spec(), Arc::clone(&arena))
            .unwrap();
        assert!(matches!(device.close(), Err(DeviceError::Close(_))));
        // second close is a no-op
        assert!(device.close().is_ok());
    }
}
