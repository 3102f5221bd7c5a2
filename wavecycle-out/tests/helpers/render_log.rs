//! Render call recording
//!
//! The renderer built by [`RenderLog::renderer`] fills each buffer with a
//! marker byte and records the call. It can be told to hang, to exercise
//! the forced-stop path of `close`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Observations of render calls
#[derive(Debug, Default)]
pub struct RenderLog {
    calls: AtomicU64,
    misaligned: AtomicU64,
    lengths: Mutex<Vec<usize>>,
    /// When set, the next render call sleeps for `hang_for`
    hang: AtomicBool,
    /// Set by a render call when it starts hanging
    hanging: AtomicBool,
    hang_for: Mutex<Duration>,
}

impl RenderLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Renderer recording into `log`
    pub fn renderer(log: Arc<RenderLog>) -> impl FnMut(&mut [u8]) + Send + 'static {
        move |buffer: &mut [u8]| {
            if log.hang.swap(false, Ordering::SeqCst) {
                log.hanging.store(true, Ordering::SeqCst);
                let hang_for = *log.hang_for.lock().unwrap();
                thread::sleep(hang_for);
            }

            if buffer.as_ptr() as usize % 16 != 0 {
                log.misaligned.fetch_add(1, Ordering::SeqCst);
            }
            buffer.fill(0x55);
            log.lengths.lock().unwrap().push(buffer.len());
            log.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn misaligned(&self) -> u64 {
        self.misaligned.load(Ordering::SeqCst)
    }

    pub fn lengths(&self) -> Vec<usize> {
        self.lengths.lock().unwrap().clone()
    }

    /// Make the next render call sleep for `duration`
    pub fn hang_next(&self, duration: Duration) {
        *self.hang_for.lock().unwrap() = duration;
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn is_hanging(&self) -> bool {
        self.hanging.load(Ordering::SeqCst)
    }
}

/// Poll `condition` every millisecond until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}
