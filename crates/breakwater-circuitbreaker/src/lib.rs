//! A call-gating circuit breaker.
//!
//! The breaker observes the outcomes of decorated calls in a sliding window
//! and stops permitting calls once the failure rate or slow-call rate
//! crosses its threshold. After a cool-down it lets a bounded number of
//! trial calls through; their outcomes alone decide whether the circuit
//! closes again or re-opens.
//!
//! Acquisition never blocks. The decorators record outcomes with the
//! configured error classification; everything can also be driven manually
//! through [`CircuitBreaker::try_acquire_permission`],
//! [`CircuitBreaker::on_success`] and [`CircuitBreaker::on_error`].
//!
//! # Example
//!
//! ```
//! use breakwater_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::builder()
//!     .failure_rate_threshold(50.0)
//!     .sliding_window_size(5)
//!     .minimum_number_of_calls(5)
//!     .wait_duration_in_open_state(Duration::from_secs(1))
//!     .build();
//! let breaker = CircuitBreaker::of("backend", config);
//!
//! let ok: Result<u32, _> = breaker.execute(|| Ok::<_, std::io::Error>(42));
//! assert_eq!(ok.unwrap(), 42);
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! ```

mod classifier;
mod config;
mod error;
mod events;
mod state;

pub use classifier::{Classification, OutcomeClassifier};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder, SlidingWindowType};
pub use error::{CallNotPermittedError, CircuitBreakerError, IllegalStateTransitionError};
pub use events::CircuitBreakerEvent;
pub use state::{CircuitBreakerMetrics, CircuitState};

use breakwater_core::{Clock, EventPublisher, OutcomeKind, Registry, SystemClock};
use futures::future::BoxFuture;
use futures::FutureExt;
use state::BreakerCore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A named circuit breaker instance.
///
/// Cheap to clone; clones share the same state machine.
pub struct CircuitBreaker<E> {
    core: Arc<BreakerCore>,
    config: CircuitBreakerConfig<E>,
    classifier: OutcomeClassifier<E>,
}

impl<E> Clone for CircuitBreaker<E> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            config: self.config.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl<E> std::fmt::Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<E> CircuitBreaker<E> {
    /// Creates a breaker named `name` from `config`, on the system clock.
    pub fn of(name: impl Into<String>, config: CircuitBreakerConfig<E>) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock::new()))
    }

    /// Creates a breaker with the default configuration.
    pub fn of_defaults(name: impl Into<String>) -> Self {
        Self::of(name, CircuitBreakerConfig::of_defaults())
    }

    /// Creates a breaker on an injected clock. Tests pass a
    /// [`breakwater_core::MockClock`] to step through open-state waits and
    /// time windows deterministically.
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig<E>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut core_config = config.core.clone();
        core_config.name = name.into();
        Self {
            core: BreakerCore::new(core_config, clock, config.events.fork()),
            classifier: config.classifier.clone(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn config(&self) -> &CircuitBreakerConfig<E> {
        &self.config
    }

    /// Current state; a lock-free read.
    pub fn state(&self) -> CircuitState {
        self.core.state()
    }

    /// Aggregates of the current state's window plus the refusal counter.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.core.metrics()
    }

    /// The event publisher of this instance.
    pub fn events(&self) -> &EventPublisher<CircuitBreakerEvent> {
        self.core.events()
    }

    /// Non-blocking permission check. A refusal increments the
    /// not-permitted counter and emits [`CircuitBreakerEvent::CallNotPermitted`].
    pub fn try_acquire_permission(&self) -> bool {
        self.core.try_acquire().is_ok()
    }

    /// Like [`Self::try_acquire_permission`] but surfaces the refusal.
    pub fn acquire_permission(&self) -> Result<(), CallNotPermittedError> {
        self.core.try_acquire().map(|_| ())
    }

    /// Returns an unconsumed half-open trial permission, for paths that
    /// acquired but then decided not to call (e.g. an ignored error).
    pub fn release_permission(&self) {
        self.core.release_current();
    }

    /// Records a successful call of the given duration.
    pub fn on_success(&self, duration: Duration) {
        self.core.record(None, OutcomeKind::Success, duration);
    }

    /// Records a failed call of the given duration.
    pub fn on_error(&self, duration: Duration) {
        self.core.record(None, OutcomeKind::Failure, duration);
    }

    /// Administrative transition to Closed.
    pub fn transition_to_closed(&self) -> Result<(), IllegalStateTransitionError> {
        self.core.transition_to(CircuitState::Closed)
    }

    /// Administrative transition to Open.
    pub fn transition_to_open(&self) -> Result<(), IllegalStateTransitionError> {
        self.core.transition_to(CircuitState::Open)
    }

    /// Administrative transition to HalfOpen.
    pub fn transition_to_half_open(&self) -> Result<(), IllegalStateTransitionError> {
        self.core.transition_to(CircuitState::HalfOpen)
    }

    /// Administrative transition to Disabled: calls flow, nothing is
    /// recorded, and only another administrative call leaves this state.
    pub fn transition_to_disabled(&self) -> Result<(), IllegalStateTransitionError> {
        self.core.transition_to(CircuitState::Disabled)
    }

    /// Administrative transition to ForcedOpen: every call is refused until
    /// another administrative call.
    pub fn transition_to_forced_open(&self) -> Result<(), IllegalStateTransitionError> {
        self.core.transition_to(CircuitState::ForcedOpen)
    }

    /// Administrative transition to MeteredOnly: calls flow and are
    /// recorded, but thresholds never trip.
    pub fn transition_to_metered_only(&self) -> Result<(), IllegalStateTransitionError> {
        self.core.transition_to(CircuitState::MeteredOnly)
    }

    /// Clears all metrics and returns to a pristine Closed state.
    pub fn reset(&self) {
        self.core.reset()
    }

    /// Runs `op` under the breaker: acquire, call, classify, record.
    ///
    /// User errors come back unchanged inside
    /// [`CircuitBreakerError::Inner`]; a refusal comes back as
    /// [`CircuitBreakerError::CallNotPermitted`] without invoking `op`.
    pub fn execute<T, F>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let epoch = self.core.try_acquire()?;
        let started = self.core.clock().now();
        let result = op();
        let duration = self.core.clock().now().saturating_duration_since(started);
        self.settle(epoch, duration, &result);
        result.map_err(CircuitBreakerError::Inner)
    }

    /// Async form of [`Self::execute`]. The permission lifecycle spans the
    /// whole future: if the caller drops it mid-flight, a half-open trial
    /// permission is returned rather than leaked.
    pub async fn execute_async<T, F, Fut>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let epoch = self.core.try_acquire()?;
        let guard = PermissionGuard {
            core: Arc::clone(&self.core),
            epoch,
            armed: true,
        };
        let started = self.core.clock().now();
        let result = op().await;
        let duration = self.core.clock().now().saturating_duration_since(started);
        guard.disarm();
        self.settle(epoch, duration, &result);
        result.map_err(CircuitBreakerError::Inner)
    }

    /// Wraps `op` so every invocation runs under this breaker.
    pub fn decorate<T, F>(&self, op: F) -> impl Fn() -> Result<T, CircuitBreakerError<E>>
    where
        F: Fn() -> Result<T, E>,
    {
        let breaker = self.clone();
        move || breaker.execute(&op)
    }

    /// Wraps an async operation factory so every invocation runs under this
    /// breaker.
    pub fn decorate_async<T, F, Fut>(
        &self,
        op: F,
    ) -> impl Fn() -> BoxFuture<'static, Result<T, CircuitBreakerError<E>>>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + Sync + 'static,
    {
        let breaker = self.clone();
        move || {
            let breaker = breaker.clone();
            let op = op.clone();
            async move { breaker.execute_async(op).await }.boxed()
        }
    }

    fn settle<T>(&self, epoch: u64, duration: Duration, result: &Result<T, E>) {
        match result {
            Ok(_) => self
                .core
                .record(Some(epoch), OutcomeKind::Success, duration),
            Err(error) => match self.classifier.classify(error) {
                Classification::Failure => {
                    self.core.record(Some(epoch), OutcomeKind::Failure, duration)
                }
                Classification::Success => {
                    self.core.record(Some(epoch), OutcomeKind::Success, duration)
                }
                Classification::Ignored => {
                    self.core.release(epoch);
                    self.core.on_ignored();
                }
            },
        }
    }
}

/// Returns a half-open trial permission when an in-flight async call is
/// dropped before completion.
struct PermissionGuard {
    core: Arc<BreakerCore>,
    epoch: u64,
    armed: bool,
}

impl PermissionGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PermissionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.core.release(self.epoch);
        }
    }
}

/// Name-keyed cache of circuit breakers sharing one configuration.
pub struct CircuitBreakerRegistry<E> {
    registry: Registry<CircuitBreaker<E>>,
    default_config: CircuitBreakerConfig<E>,
}

impl<E> CircuitBreakerRegistry<E> {
    /// A registry whose instances are built from `default_config`.
    pub fn of(default_config: CircuitBreakerConfig<E>) -> Self {
        Self {
            registry: Registry::new(),
            default_config,
        }
    }

    /// A registry with the stock defaults.
    pub fn of_defaults() -> Self {
        Self::of(CircuitBreakerConfig::of_defaults())
    }

    /// Returns the breaker registered under `name`, building it from the
    /// registry's default configuration on first access.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker<E>> {
        self.registry
            .get_or_create(name, || CircuitBreaker::of(name, self.default_config.clone()))
    }

    /// Returns the breaker registered under `name`, building it from
    /// `config` on first access.
    pub fn get_with_config(
        &self,
        name: &str,
        config: CircuitBreakerConfig<E>,
    ) -> Arc<CircuitBreaker<E>> {
        self.registry
            .get_or_create(name, || CircuitBreaker::of(name, config))
    }

    pub fn find(&self, name: &str) -> Option<Arc<CircuitBreaker<E>>> {
        self.registry.find(name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker<E>>> {
        self.registry.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }
}

impl<E> std::fmt::Debug for CircuitBreakerRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
