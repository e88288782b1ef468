//! Wall clock used by the checkpoint throttle.
//!
//! The throttle only ever asks "how long since the last save", so the
//! clock is a monotonic elapsed-time source. Tests drive a `ManualClock`
//! instead of sleeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait WallClock: Send {
    /// Monotonic time since an arbitrary, fixed origin.
    fn now(&self) -> Duration;
}

/// Real monotonic time.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self { Self::new() }
}

impl WallClock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to. Clones share the same time, so a
/// test keeps one handle and gives the other to the simulation.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Time-triggered save policy: `due` once more than `interval` has passed
/// since the last `mark_saved`.
pub struct SaveThrottle {
    clock:      Box<dyn WallClock>,
    interval:   Duration,
    last_saved: Duration,
}

impl SaveThrottle {
    pub fn new(clock: Box<dyn WallClock>, interval: Duration) -> Self {
        let last_saved = clock.now();
        Self { clock, interval, last_saved }
    }

    pub fn interval(&self) -> Duration { self.interval }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn due(&self) -> bool {
        self.clock.now().saturating_sub(self.last_saved) > self.interval
    }

    pub fn mark_saved(&mut self) {
        self.last_saved = self.clock.now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_handles_share_time() {
        let clock = ManualClock::new();
        let handle = clock.clone();
        handle.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(5));
    }

    #[test]
    fn throttle_fires_after_interval() {
        let clock = ManualClock::new();
        let mut throttle = SaveThrottle::new(Box::new(clock.clone()), Duration::from_secs(10));
        assert!(!throttle.due());
        clock.advance(Duration::from_secs(10));
        assert!(!throttle.due(), "exactly the interval is not yet overdue");
        clock.advance(Duration::from_secs(1));
        assert!(throttle.due());
        throttle.mark_saved();
        assert!(!throttle.due());
    }
}
