//! Time source for blocking I/O loops
//!
//! Every deadline and every "wait for the move to finish" sleep goes through a
//! [`Clock`], so the same polling code runs against real hardware
//! ([`SystemClock`]) or against the gantry model with virtual time
//! ([`SimulatedClock`]).

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source with a blocking sleep
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created
    fn now(&self) -> Duration;

    /// Block for `duration`
    fn sleep(&self, duration: Duration);

    /// Deadline `timeout` from now
    fn deadline(&self, timeout: Duration) -> Duration {
        self.now() + timeout
    }

    /// Whether `deadline` is still in the future
    fn before(&self, deadline: Duration) -> bool {
        self.now() < deadline
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by [`Instant`] and [`std::thread::sleep`]
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Shared handle to a fresh system clock
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances time instantly
#[derive(Debug, Default)]
pub struct SimulatedClock {
    elapsed: Mutex<Duration>,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move virtual time forward
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Duration {
        *self.elapsed.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_clock_sleep_advances() {
        let clock = SimulatedClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.sleep(Duration::from_millis(250));
        clock.advance(Duration::from_millis(750));
        assert_eq!(clock.now(), Duration::from_secs(1));
    }

    #[test]
    fn test_deadline_helpers() {
        let clock = SimulatedClock::new();
        let deadline = clock.deadline(Duration::from_millis(10));
        assert!(clock.before(deadline));
        clock.sleep(Duration::from_millis(10));
        assert!(!clock.before(deadline));
    }
}
