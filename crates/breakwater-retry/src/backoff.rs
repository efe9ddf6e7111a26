//! Backoff interval functions.
//!
//! An [`IntervalFunction`] maps a 1-indexed retry attempt to the delay
//! slept before that attempt. All implementations yield non-negative
//! durations; the exponential variants honor an optional cap.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Maps a retry attempt (1 = first retry) to its delay.
pub trait IntervalFunction: Send + Sync {
    fn interval(&self, attempt: usize) -> Duration;
}

/// The same delay before every retry.
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval {
    interval: Duration,
}

impl FixedInterval {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl IntervalFunction for FixedInterval {
    fn interval(&self, _attempt: usize) -> Duration {
        self.interval
    }
}

/// `initial * multiplier^(attempt - 1)`, optionally capped.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: f64,
    max_interval: Option<Duration>,
}

impl ExponentialBackoff {
    /// Backoff with the conventional multiplier of 1.5 and no cap.
    pub fn new(initial: Duration) -> Self {
        Self {
            initial,
            multiplier: 1.5,
            max_interval: None,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        assert!(multiplier >= 1.0, "multiplier must be at least 1.0");
        self.multiplier = multiplier;
        self
    }

    /// Caps every computed delay at `max`.
    pub fn with_max_interval(mut self, max: Duration) -> Self {
        self.max_interval = Some(max);
        self
    }
}

impl IntervalFunction for ExponentialBackoff {
    fn interval(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX);
        match self.max_interval {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// Exponential backoff with uniform jitter: each delay is drawn from
/// `[d * (1 - factor), d * (1 + factor)]`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialRandomBackoff {
    exponential: ExponentialBackoff,
    randomization_factor: f64,
}

impl ExponentialRandomBackoff {
    pub fn new(initial: Duration, randomization_factor: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&randomization_factor),
            "randomization_factor must be in [0, 1]"
        );
        Self {
            exponential: ExponentialBackoff::new(initial),
            randomization_factor,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.exponential = self.exponential.with_multiplier(multiplier);
        self
    }

    pub fn with_max_interval(mut self, max: Duration) -> Self {
        self.exponential = self.exponential.with_max_interval(max);
        self
    }
}

impl IntervalFunction for ExponentialRandomBackoff {
    fn interval(&self, attempt: usize) -> Duration {
        let base = self.exponential.interval(attempt).as_secs_f64();
        let spread = base * self.randomization_factor;
        let jittered = rand::rng().random_range(base - spread..=base + spread);
        Duration::try_from_secs_f64(jittered.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// A closure-backed [`IntervalFunction`].
#[derive(Clone)]
pub struct FnInterval {
    f: Arc<dyn Fn(usize) -> Duration + Send + Sync>,
}

impl FnInterval {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(usize) -> Duration + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

impl IntervalFunction for FnInterval {
    fn interval(&self, attempt: usize) -> Duration {
        (self.f)(attempt)
    }
}

impl std::fmt::Debug for FnInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInterval").finish_non_exhaustive()
    }
}
