//! Completion signal for device adapters
//!
//! Auto-reset event: `notify` latches one pending wake-up, `wait` consumes it.
//! Notifications that arrive while nobody waits are not lost, and several
//! notifications before a wait collapse into one wake-up. The render worker
//! rescans every slot on each wake-up, so collapsing is harmless.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Auto-reset "at least one slot completed" event
#[derive(Debug, Default)]
pub struct CompletionSignal {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a wake-up and wake one waiter.
    ///
    /// Safe to call from an audio callback: takes an uncontended lock briefly.
    pub fn notify(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.condvar.notify_one();
    }

    /// Block until notified or `timeout` elapses (`None` waits forever).
    ///
    /// Returns true if a notification was consumed.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        match timeout {
            None => {
                while !*pending {
                    pending = self
                        .condvar
                        .wait(pending)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*pending {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    pending = self
                        .condvar
                        .wait_timeout(pending, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }

        *pending = false;
        true
    }
}
