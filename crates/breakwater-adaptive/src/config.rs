use crate::events::AdaptiveBulkheadEvent;
use crate::AdaptiveState;
use breakwater_core::events::{EventPublisher, FnListener};
use std::time::Duration;

/// Immutable configuration of an adaptive bulkhead.
#[derive(Clone)]
pub struct AdaptiveBulkheadConfig {
    pub(crate) min_limit: usize,
    pub(crate) max_limit: usize,
    pub(crate) initial_limit: usize,
    pub(crate) increase_multiplier: f32,
    pub(crate) increase_summand: f32,
    pub(crate) decrease_multiplier: f32,
    pub(crate) failure_rate_threshold: f32,
    pub(crate) slow_call_rate_threshold: f32,
    pub(crate) slow_call_duration_threshold: Duration,
    pub(crate) minimum_number_of_calls: u32,
    pub(crate) sliding_window_size: u32,
    pub(crate) max_wait_duration: Option<Duration>,
    pub(crate) events: EventPublisher<AdaptiveBulkheadEvent>,
}

impl AdaptiveBulkheadConfig {
    pub fn builder() -> AdaptiveBulkheadConfigBuilder {
        AdaptiveBulkheadConfigBuilder::new()
    }

    pub fn of_defaults() -> Self {
        Self::builder().build()
    }

    pub fn min_limit(&self) -> usize {
        self.min_limit
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    pub fn initial_limit(&self) -> usize {
        self.initial_limit
    }
}

impl std::fmt::Debug for AdaptiveBulkheadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveBulkheadConfig")
            .field("min_limit", &self.min_limit)
            .field("max_limit", &self.max_limit)
            .field("initial_limit", &self.initial_limit)
            .field("failure_rate_threshold", &self.failure_rate_threshold)
            .finish_non_exhaustive()
    }
}

/// Builder for [`AdaptiveBulkheadConfig`].
pub struct AdaptiveBulkheadConfigBuilder {
    min_limit: usize,
    max_limit: usize,
    initial_limit: Option<usize>,
    increase_multiplier: f32,
    increase_summand: f32,
    decrease_multiplier: f32,
    failure_rate_threshold: f32,
    slow_call_rate_threshold: f32,
    slow_call_duration_threshold: Duration,
    minimum_number_of_calls: u32,
    sliding_window_size: u32,
    max_wait_duration: Option<Duration>,
    events: EventPublisher<AdaptiveBulkheadEvent>,
}

impl AdaptiveBulkheadConfigBuilder {
    /// Defaults: limit range 1..=100 starting at 10, doubling in slow
    /// start, +1/x0.5 in congestion avoidance, 50% failure threshold,
    /// slow-call detection off, window of 10 calls.
    pub fn new() -> Self {
        Self {
            min_limit: 1,
            max_limit: 100,
            initial_limit: None,
            increase_multiplier: 2.0,
            increase_summand: 1.0,
            decrease_multiplier: 0.5,
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_secs(60),
            minimum_number_of_calls: 10,
            sliding_window_size: 10,
            max_wait_duration: Some(Duration::ZERO),
            events: EventPublisher::new(),
        }
    }

    /// Floor of the concurrency limit. Must be at least 1.
    pub fn min_limit(mut self, limit: usize) -> Self {
        self.min_limit = limit;
        self
    }

    /// Ceiling of the concurrency limit.
    pub fn max_limit(mut self, limit: usize) -> Self {
        self.max_limit = limit;
        self
    }

    /// Starting limit; clamped into `[min_limit, max_limit]`.
    ///
    /// Default: 10
    pub fn initial_limit(mut self, limit: usize) -> Self {
        self.initial_limit = Some(limit);
        self
    }

    /// Slow-start growth factor. Must be above 1.0.
    ///
    /// Default: 2.0
    pub fn increase_multiplier(mut self, multiplier: f32) -> Self {
        self.increase_multiplier = multiplier;
        self
    }

    /// Congestion-avoidance additive step.
    ///
    /// Default: 1.0
    pub fn increase_summand(mut self, summand: f32) -> Self {
        self.increase_summand = summand;
        self
    }

    /// Shrink factor applied above the thresholds. Must be in (0, 1).
    ///
    /// Default: 0.5
    pub fn decrease_multiplier(mut self, multiplier: f32) -> Self {
        self.decrease_multiplier = multiplier;
        self
    }

    /// Failure percentage at or above which the limit shrinks.
    ///
    /// Default: 50.0
    pub fn failure_rate_threshold(mut self, percent: f32) -> Self {
        self.failure_rate_threshold = percent;
        self
    }

    /// Slow-call percentage at or above which the limit shrinks.
    ///
    /// Default: 100.0 (effectively disabled)
    pub fn slow_call_rate_threshold(mut self, percent: f32) -> Self {
        self.slow_call_rate_threshold = percent;
        self
    }

    /// Calls lasting at least this long count as slow.
    ///
    /// Default: 60 seconds
    pub fn slow_call_duration_threshold(mut self, threshold: Duration) -> Self {
        self.slow_call_duration_threshold = threshold;
        self
    }

    /// Minimum recorded calls before the control loop adapts.
    ///
    /// Default: 10
    pub fn minimum_number_of_calls(mut self, n: u32) -> Self {
        self.minimum_number_of_calls = n;
        self
    }

    /// Length of the observation window, in calls.
    ///
    /// Default: 10
    pub fn sliding_window_size(mut self, size: u32) -> Self {
        self.sliding_window_size = size;
        self
    }

    /// Wait budget for the inner bulkhead's blocking acquisitions.
    ///
    /// Default: `Some(Duration::ZERO)` (fail immediately when full)
    pub fn max_wait_duration(mut self, duration: Option<Duration>) -> Self {
        self.max_wait_duration = duration;
        self
    }

    /// Register a callback for limit changes (increases and decreases).
    pub fn on_limit_changed<F>(self, f: F) -> Self
    where
        F: Fn(usize, bool) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &AdaptiveBulkheadEvent| {
                match event {
                    AdaptiveBulkheadEvent::LimitIncreased { new_limit, .. } => f(*new_limit, true),
                    AdaptiveBulkheadEvent::LimitDecreased { new_limit, .. } => f(*new_limit, false),
                    AdaptiveBulkheadEvent::StateTransition { .. } => {}
                }
            }));
        self
    }

    /// Register a callback for regime switches.
    pub fn on_state_transition<F>(self, f: F) -> Self
    where
        F: Fn(AdaptiveState, AdaptiveState) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &AdaptiveBulkheadEvent| {
                if let AdaptiveBulkheadEvent::StateTransition { from, to, .. } = event {
                    f(*from, *to);
                }
            }));
        self
    }

    /// Builds the configuration.
    ///
    /// # Panics
    ///
    /// Panics on an empty limit range or degenerate factors.
    pub fn build(self) -> AdaptiveBulkheadConfig {
        assert!(self.min_limit >= 1, "min_limit must be at least 1");
        assert!(
            self.min_limit <= self.max_limit,
            "min_limit must not exceed max_limit"
        );
        assert!(
            self.increase_multiplier > 1.0,
            "increase_multiplier must be above 1.0"
        );
        assert!(
            self.decrease_multiplier > 0.0 && self.decrease_multiplier < 1.0,
            "decrease_multiplier must be in (0, 1)"
        );
        assert!(
            self.increase_summand > 0.0,
            "increase_summand must be positive"
        );

        let initial = self
            .initial_limit
            .unwrap_or(10)
            .clamp(self.min_limit, self.max_limit);

        AdaptiveBulkheadConfig {
            min_limit: self.min_limit,
            max_limit: self.max_limit,
            initial_limit: initial,
            increase_multiplier: self.increase_multiplier,
            increase_summand: self.increase_summand,
            decrease_multiplier: self.decrease_multiplier,
            failure_rate_threshold: self.failure_rate_threshold,
            slow_call_rate_threshold: self.slow_call_rate_threshold,
            slow_call_duration_threshold: self.slow_call_duration_threshold,
            minimum_number_of_calls: self.minimum_number_of_calls.max(1),
            sliding_window_size: self.sliding_window_size.max(1),
            max_wait_duration: self.max_wait_duration,
            events: self.events,
        }
    }
}

impl Default for AdaptiveBulkheadConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
