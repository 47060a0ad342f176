//! Time sources in seconds.
//!
//! The metronome reads the output device's sample clock; the exercise loop
//! reads a monotonic wall clock. Tests drive both with a [`ManualClock`].

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// A monotonic time source in seconds.
pub trait Clock: Send + Sync {
    /// Current time, or `None` if the underlying device is gone.
    fn now(&self) -> Option<f64>;
}

/// Wall clock measured from its own creation.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Option<f64> {
        Some(self.origin.elapsed().as_secs_f64())
    }
}

/// Hand-advanced clock for simulations and tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    time: Arc<Mutex<Option<f64>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            time: Arc::new(Mutex::new(Some(0.0))),
        }
    }

    pub fn set(&self, secs: f64) {
        *self.time.lock() = Some(secs);
    }

    pub fn advance(&self, secs: f64) {
        let mut time = self.time.lock();
        *time = Some(time.unwrap_or(0.0) + secs);
    }

    /// Simulates a device that can no longer report time.
    pub fn disconnect(&self) {
        *self.time.lock() = None;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Option<f64> {
        *self.time.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new();
        let view = clock.clone();
        clock.advance(0.25);
        clock.advance(0.25);
        assert_eq!(view.now(), Some(0.5));
        clock.disconnect();
        assert_eq!(view.now(), None);
    }
}
