//! Injectable clock abstraction.
//!
//! All time reads in the routing and delivery path go through [`Clock`] so
//! that TTL expiry, backoff eligibility, and breaker cooldowns can be tested
//! without wall-clock waits.

use crate::Timestamp;
use std::sync::Mutex;
use std::time::Duration;

/// Source of the current time.
///
/// Implementations must be thread-safe; the processor and monitor tasks
/// share one clock behind an `Arc`.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Current moment
    fn now(&self) -> Timestamp;
}

/// Wall-clock implementation used in production
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced clock for deterministic tests
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Timestamp>,
}

impl ManualClock {
    /// Create a manual clock starting at the given instant
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Create a manual clock starting at the current wall-clock time
    pub fn starting_now() -> Self {
        Self::new(Timestamp::now())
    }

    /// Advance the clock by the given duration
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock().unwrap();
        *current = current.add_duration(duration);
    }

    /// Set the clock to an absolute instant
    pub fn set(&self, instant: Timestamp) {
        *self.current.lock().unwrap() = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.lock().unwrap()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
