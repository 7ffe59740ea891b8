//! Monotonic time sources for interval scheduling

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Seconds since an arbitrary fixed origin. Never goes backwards.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock backed by `Instant`
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A clock driven by the host, e.g. a fixed-step game loop
///
/// Stored as whole microseconds so it can be shared across threads without a
/// lock.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `seconds`. Negative steps are ignored.
    pub fn advance(&self, seconds: f64) {
        if seconds > 0.0 {
            self.micros
                .fetch_add((seconds * 1_000_000.0).round() as u64, Ordering::SeqCst);
        }
    }

    /// Jump to `seconds`, unless that would move the clock backwards.
    pub fn set(&self, seconds: f64) {
        let target = (seconds.max(0.0) * 1_000_000.0).round() as u64;
        self.micros.fetch_max(target, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}
