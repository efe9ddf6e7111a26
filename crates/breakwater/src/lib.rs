//! In-process fault-tolerance primitives.
//!
//! breakwater surrounds arbitrary computations with policies governing
//! whether, when, and how they may execute:
//!
//! - [`CircuitBreaker`] gates calls behind a sliding-window state machine
//!   that opens on failure or latency and probes recovery with a bounded
//!   set of trial calls.
//! - [`RateLimiter`] grants at most N permits per refresh period, letting
//!   callers wait a bounded time for a reservation.
//! - [`SemaphoreBulkhead`] and [`ThreadPoolBulkhead`] cap concurrent
//!   calls, in-place or on an owned worker pool.
//! - [`Retry`] re-invokes failed operations on a backoff schedule.
//! - [`AdaptiveBulkhead`] drives a bulkhead's limit with an AIMD
//!   congestion-control loop.
//!
//! The primitives compose by wrapping each other's decorators; they share
//! the event, metrics-window, clock, and registry substrate of
//! [`breakwater_core`].
//!
//! # Composition
//!
//! Policies nest from the outside in: retry around the breaker, breaker
//! around the bulkhead.
//!
//! ```
//! use breakwater::{CircuitBreaker, CircuitBreakerConfig, Retry, RetryConfig};
//! use std::time::Duration;
//!
//! # fn call_backend() -> Result<&'static str, std::io::Error> { Ok("ok") }
//! let breaker = CircuitBreaker::of("backend", CircuitBreakerConfig::builder().build());
//! let retry = Retry::of(
//!     "backend",
//!     RetryConfig::builder()
//!         .max_attempts(3)
//!         .wait_duration(Duration::from_millis(50))
//!         .retry_on_error(|e: &breakwater::CircuitBreakerError<std::io::Error>| {
//!             !e.is_call_not_permitted()
//!         })
//!         .build(),
//! );
//!
//! let guarded = || breaker.execute(call_backend);
//! let result = retry.execute(guarded);
//! assert_eq!(result.unwrap(), "ok");
//! ```

pub use breakwater_core::{
    Clock, CountWindow, EventListener, EventPublisher, FnListener, MockClock, OutcomeKind,
    PolicyEvent, Registry, SlidingWindow, SystemClock, TimeWindow, WindowSnapshot,
    NOT_ENOUGH_DATA,
};

pub use breakwater_circuitbreaker::{
    CallNotPermittedError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerError, CircuitBreakerEvent, CircuitBreakerMetrics, CircuitBreakerRegistry,
    CircuitState, IllegalStateTransitionError, SlidingWindowType,
};

pub use breakwater_ratelimiter::{
    RateLimiter, RateLimiterConfig, RateLimiterConfigBuilder, RateLimiterError, RateLimiterEvent,
    RateLimiterKind, RateLimiterMetrics, RateLimiterRegistry, RequestNotPermittedError,
};

pub use breakwater_bulkhead::{
    BulkheadConfig, BulkheadConfigBuilder, BulkheadError, BulkheadEvent, BulkheadFullError,
    BulkheadMetrics, BulkheadRegistry, SemaphoreBulkhead, TaskCanceledError, TaskHandle,
    ThreadPoolBulkhead, ThreadPoolBulkheadConfig, ThreadPoolBulkheadConfigBuilder,
    ThreadPoolBulkheadMetrics,
};

pub use breakwater_retry::{
    ExponentialBackoff, ExponentialRandomBackoff, FixedInterval, FnInterval, IntervalFunction,
    MaxRetriesExceededError, Retry, RetryConfig, RetryConfigBuilder, RetryError, RetryEvent,
    RetryMetrics, RetryRegistry,
};

pub use breakwater_adaptive::{
    AdaptiveBulkhead, AdaptiveBulkheadConfig, AdaptiveBulkheadConfigBuilder,
    AdaptiveBulkheadEvent, AdaptiveBulkheadMetrics, AdaptiveBulkheadRegistry, AdaptiveState,
};
