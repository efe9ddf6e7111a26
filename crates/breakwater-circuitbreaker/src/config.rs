use crate::classifier::OutcomeClassifier;
use crate::events::CircuitBreakerEvent;
use crate::state::{CircuitState, CoreConfig};
use breakwater_core::events::{EventPublisher, FnListener};
use std::sync::Arc;
use std::time::Duration;

/// Shape of the sliding window used for threshold evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlidingWindowType {
    /// Window over the last N calls.
    CountBased,
    /// Window over the calls of the last N seconds.
    TimeBased,
}

/// Immutable configuration of a circuit breaker.
///
/// `E` is the error type of the operations the breaker will decorate; the
/// record/ignore predicates are built once here and only ever invoked as
/// closures (the breaker itself never inspects error types).
pub struct CircuitBreakerConfig<E> {
    pub(crate) core: CoreConfig,
    pub(crate) classifier: OutcomeClassifier<E>,
    pub(crate) events: EventPublisher<CircuitBreakerEvent>,
}

impl<E> CircuitBreakerConfig<E> {
    /// Creates a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder<E> {
        CircuitBreakerConfigBuilder::new()
    }

    /// The defaults, unchanged.
    pub fn of_defaults() -> Self {
        Self::builder().build()
    }

    pub fn failure_rate_threshold(&self) -> f32 {
        self.core.failure_rate_threshold
    }

    pub fn slow_call_rate_threshold(&self) -> f32 {
        self.core.slow_call_rate_threshold
    }

    pub fn slow_call_duration_threshold(&self) -> Duration {
        self.core.slow_call_duration_threshold
    }

    pub fn minimum_number_of_calls(&self) -> u32 {
        self.core.minimum_number_of_calls
    }

    pub fn sliding_window_type(&self) -> SlidingWindowType {
        self.core.sliding_window_type
    }

    pub fn sliding_window_size(&self) -> u32 {
        self.core.sliding_window_size
    }

    pub fn wait_duration_in_open_state(&self) -> Duration {
        self.core.wait_duration_in_open_state
    }

    pub fn permitted_number_of_calls_in_half_open_state(&self) -> u32 {
        self.core.permitted_number_of_calls_in_half_open_state
    }

    pub fn automatic_transition_from_open_to_half_open(&self) -> bool {
        self.core.automatic_transition_from_open_to_half_open
    }
}

impl<E> Clone for CircuitBreakerConfig<E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            classifier: self.classifier.clone(),
            events: self.events.clone(),
        }
    }
}

impl<E> std::fmt::Debug for CircuitBreakerConfig<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_rate_threshold", &self.core.failure_rate_threshold)
            .field(
                "slow_call_rate_threshold",
                &self.core.slow_call_rate_threshold,
            )
            .field("sliding_window_type", &self.core.sliding_window_type)
            .field("sliding_window_size", &self.core.sliding_window_size)
            .finish_non_exhaustive()
    }
}

/// Builder for [`CircuitBreakerConfig`].
pub struct CircuitBreakerConfigBuilder<E> {
    failure_rate_threshold: f32,
    slow_call_rate_threshold: f32,
    slow_call_duration_threshold: Duration,
    minimum_number_of_calls: Option<u32>,
    sliding_window_type: SlidingWindowType,
    sliding_window_size: u32,
    wait_duration_in_open_state: Duration,
    permitted_number_of_calls_in_half_open_state: u32,
    automatic_transition_from_open_to_half_open: bool,
    record_error: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    ignore_error: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    events: EventPublisher<CircuitBreakerEvent>,
}

impl<E> CircuitBreakerConfigBuilder<E> {
    /// Defaults: 50% failure threshold, slow-call detection effectively off
    /// (100% rate, 60s duration), count window of 100 with the window size
    /// as the minimum, 30s open wait, 10 half-open probes.
    pub fn new() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_secs(60),
            minimum_number_of_calls: None,
            sliding_window_type: SlidingWindowType::CountBased,
            sliding_window_size: 100,
            wait_duration_in_open_state: Duration::from_secs(30),
            permitted_number_of_calls_in_half_open_state: 10,
            automatic_transition_from_open_to_half_open: false,
            record_error: Arc::new(|_| true),
            ignore_error: Arc::new(|_| false),
            events: EventPublisher::new(),
        }
    }

    /// Failure percentage at or above which the circuit opens.
    ///
    /// Must be in `(0, 100]`. Default: 50.0
    pub fn failure_rate_threshold(mut self, percent: f32) -> Self {
        self.failure_rate_threshold = percent;
        self
    }

    /// Slow-call percentage at or above which the circuit opens.
    ///
    /// Must be in `(0, 100]`. Default: 100.0 (effectively disabled)
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

    /// Minimum recorded calls before the rates are evaluated at all.
    ///
    /// Default: the sliding window size
    pub fn minimum_number_of_calls(mut self, n: u32) -> Self {
        self.minimum_number_of_calls = Some(n);
        self
    }

    /// Count- or time-based sliding window.
    ///
    /// Default: count-based
    pub fn sliding_window_type(mut self, window_type: SlidingWindowType) -> Self {
        self.sliding_window_type = window_type;
        self
    }

    /// Window length: number of calls (count-based) or seconds (time-based).
    ///
    /// Default: 100
    pub fn sliding_window_size(mut self, size: u32) -> Self {
        self.sliding_window_size = size;
        self
    }

    /// How long the circuit stays open before half-open probing may begin.
    ///
    /// Default: 30 seconds
    pub fn wait_duration_in_open_state(mut self, duration: Duration) -> Self {
        self.wait_duration_in_open_state = duration;
        self
    }

    /// Number of trial permits in the half-open state.
    ///
    /// Default: 10
    pub fn permitted_number_of_calls_in_half_open_state(mut self, n: u32) -> Self {
        self.permitted_number_of_calls_in_half_open_state = n;
        self
    }

    /// When set, entering the open state schedules the half-open transition
    /// instead of waiting for the next acquisition attempt. Requires a
    /// tokio runtime at the time the circuit opens.
    ///
    /// Default: false
    pub fn automatic_transition_from_open_to_half_open(mut self, enabled: bool) -> Self {
        self.automatic_transition_from_open_to_half_open = enabled;
        self
    }

    /// Which errors count as failures. Errors matching neither this nor the
    /// ignore predicate are recorded as successes.
    ///
    /// Default: every error is a failure
    pub fn record_error<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.record_error = Arc::new(predicate);
        self
    }

    /// Which errors are ignored entirely: not recorded, permission
    /// returned. Checked before the record predicate.
    ///
    /// Default: none
    pub fn ignore_error<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.ignore_error = Arc::new(predicate);
        self
    }

    /// Register a callback for state transitions.
    pub fn on_state_transition<F>(self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::StateTransition { from, to, .. } = event {
                    f(*from, *to);
                }
            }));
        self
    }

    /// Register a callback for refused calls.
    pub fn on_call_not_permitted<F>(self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &CircuitBreakerEvent| {
                if matches!(event, CircuitBreakerEvent::CallNotPermitted { .. }) {
                    f();
                }
            }));
        self
    }

    /// Register a callback for recorded successes.
    pub fn on_success<F>(self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::SuccessRecorded { duration, .. } = event {
                    f(*duration);
                }
            }));
        self
    }

    /// Register a callback for recorded failures.
    pub fn on_error<F>(self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::FailureRecorded { duration, .. } = event {
                    f(*duration);
                }
            }));
        self
    }

    /// Register a callback for ignored errors.
    pub fn on_ignored_error<F>(self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &CircuitBreakerEvent| {
                if matches!(event, CircuitBreakerEvent::IgnoredError { .. }) {
                    f();
                }
            }));
        self
    }

    /// Builds the configuration.
    ///
    /// # Panics
    ///
    /// Panics when a threshold is outside `(0, 100]`, the window size is
    /// zero, or the half-open probe count is zero.
    pub fn build(self) -> CircuitBreakerConfig<E> {
        assert!(
            self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 100.0,
            "failure_rate_threshold must be in (0, 100]"
        );
        assert!(
            self.slow_call_rate_threshold > 0.0 && self.slow_call_rate_threshold <= 100.0,
            "slow_call_rate_threshold must be in (0, 100]"
        );
        assert!(
            self.sliding_window_size >= 1,
            "sliding_window_size must be at least 1"
        );
        assert!(
            self.permitted_number_of_calls_in_half_open_state >= 1,
            "permitted_number_of_calls_in_half_open_state must be at least 1"
        );

        CircuitBreakerConfig {
            core: CoreConfig {
                // The name is attached when an instance is created.
                name: String::new(),
                failure_rate_threshold: self.failure_rate_threshold,
                slow_call_rate_threshold: self.slow_call_rate_threshold,
                slow_call_duration_threshold: self.slow_call_duration_threshold,
                minimum_number_of_calls: self
                    .minimum_number_of_calls
                    .unwrap_or(self.sliding_window_size)
                    .max(1),
                sliding_window_type: self.sliding_window_type,
                sliding_window_size: self.sliding_window_size,
                wait_duration_in_open_state: self.wait_duration_in_open_state,
                permitted_number_of_calls_in_half_open_state: self
                    .permitted_number_of_calls_in_half_open_state,
                automatic_transition_from_open_to_half_open: self
                    .automatic_transition_from_open_to_half_open,
            },
            classifier: OutcomeClassifier::new(self.record_error, self.ignore_error),
            events: self.events,
        }
    }
}

impl<E> Default for CircuitBreakerConfigBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}
