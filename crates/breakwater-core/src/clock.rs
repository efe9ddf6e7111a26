//! Injectable time source.
//!
//! Every time-sensitive primitive takes an `Arc<dyn Clock>` at construction.
//! Production code passes [`SystemClock`]; tests pass a [`MockClock`] and
//! advance it by hand, which keeps cycle arithmetic and open-state timers
//! deterministic without sleeping.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic time source.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Monotonic nanoseconds elapsed since the clock was created.
    ///
    /// Used for cycle/epoch arithmetic where a plain integer is more
    /// convenient than an [`Instant`].
    fn elapsed_nanos(&self) -> u64;
}

/// Wall-clock backed [`Clock`].
#[derive(Debug)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed_nanos(&self) -> u64 {
        self.started.elapsed().as_nanos() as u64
    }
}

/// Manually advanced [`Clock`] for tests.
///
/// Starts at zero elapsed nanoseconds; [`MockClock::advance`] moves it
/// forward. Shared freely across threads.
#[derive(Debug)]
pub struct MockClock {
    base: Instant,
    offset_nanos: AtomicU64,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.offset_nanos
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }

    fn elapsed_nanos(&self) -> u64 {
        self.offset_nanos.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.elapsed_nanos();
        let b = clock.elapsed_nanos();
        assert!(b >= a);
    }

    #[test]
    fn mock_clock_starts_at_zero() {
        let clock = MockClock::new();
        assert_eq!(clock.elapsed_nanos(), 0);
    }

    #[test]
    fn mock_clock_advances() {
        let clock = MockClock::new();
        let before = clock.now();

        clock.advance(Duration::from_secs(5));

        assert_eq!(clock.elapsed_nanos(), 5_000_000_000);
        assert_eq!(clock.now() - before, Duration::from_secs(5));
    }
}
