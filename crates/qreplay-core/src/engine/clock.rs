//! Time source for the ingest thread and workers.
//!
//! Production code uses [`SystemClock`]. [`ManualClock`] never blocks: its
//! `sleep` advances the clock, which lets tests observe timing decisions.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time and real sleeps.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock advanced only by `sleep` and `advance`.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
    slept: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            slept: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves time forward without counting it as sleep.
    pub fn advance(&self, duration: Duration) {
        *self.offset.lock() += duration;
    }

    /// Total time passed to `sleep`.
    pub fn total_slept(&self) -> Duration {
        *self.slept.lock()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    fn sleep(&self, duration: Duration) {
        *self.offset.lock() += duration;
        *self.slept.lock() += duration;
    }
}
