//! A permit-issuing rate limiter.
//!
//! Time since construction is divided into refresh periods; each period
//! grants at most `limit_for_period` permits. A caller whose permits are
//! not available yet receives a reservation against a future period and
//! sleeps out the wait, bounded by `timeout_duration`; a reservation that
//! cannot be served within the timeout is refused and consumes nothing.
//!
//! The refill variant replenishes continuously instead of in period-sized
//! steps and admits bursts up to a configurable capacity.
//!
//! # Example
//!
//! ```
//! use breakwater_ratelimiter::{RateLimiter, RateLimiterConfig};
//! use std::time::Duration;
//!
//! let config = RateLimiterConfig::builder()
//!     .limit_for_period(10)
//!     .limit_refresh_period(Duration::from_secs(60))
//!     .timeout_duration(Duration::from_millis(100))
//!     .build();
//! let limiter = RateLimiter::of("lookup", config);
//!
//! for _ in 0..10 {
//!     assert!(limiter.try_acquire_permission(1));
//! }
//! assert!(!limiter.try_acquire_permission(1));
//! ```

mod config;
mod error;
mod events;
mod limiter;

pub use config::{RateLimiterConfig, RateLimiterConfigBuilder, RateLimiterKind};
pub use error::{RateLimiterError, RequestNotPermittedError};
pub use events::RateLimiterEvent;

use breakwater_core::{Clock, EventPublisher, Registry, SystemClock};
use futures::future::BoxFuture;
use futures::FutureExt;
use limiter::{CycleState, LimiterShared, LimiterState, RefillState};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Point-in-time view of a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterMetrics {
    /// Permits available right now. Negative when callers hold
    /// reservations against future periods.
    pub available_permissions: i64,
    /// Callers currently sleeping out a reservation.
    pub number_of_waiting_threads: usize,
    /// Wait assigned to the most recent granted reservation.
    pub latest_wait: Duration,
}

struct LimiterInner {
    name: String,
    config: RateLimiterConfig,
    period_nanos: u64,
    nanos_per_permit: u64,
    shared: Mutex<LimiterShared>,
    waiting: AtomicUsize,
    clock: Arc<dyn Clock>,
    events: EventPublisher<RateLimiterEvent>,
}

/// A named rate limiter instance.
///
/// Cheap to clone; clones share the same permit state.
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.inner.name)
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a limiter named `name` from `config`, on the system clock.
    pub fn of(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock::new()))
    }

    /// Creates a limiter with the default configuration.
    pub fn of_defaults(name: impl Into<String>) -> Self {
        Self::of(name, RateLimiterConfig::of_defaults())
    }

    /// Creates a limiter on an injected clock.
    pub fn with_clock(
        name: impl Into<String>,
        config: RateLimiterConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let period_nanos = config.limit_refresh_period.as_nanos() as u64;
        let nanos_per_permit = (period_nanos / config.limit_for_period as u64).max(1);
        let state = match config.kind {
            RateLimiterKind::Cycle => LimiterState::Cycle(CycleState::new(config.limit_for_period)),
            RateLimiterKind::Refill => LimiterState::Refill(RefillState::new(
                config.initial_permits(),
                clock.elapsed_nanos(),
            )),
        };
        let shared = LimiterShared {
            state,
            limit_for_period: config.limit_for_period,
            timeout_nanos: config.timeout_duration.as_nanos() as u64,
        };
        let events = config.events.fork();
        Self {
            inner: Arc::new(LimiterInner {
                name: name.into(),
                config,
                period_nanos,
                nanos_per_permit,
                shared: Mutex::new(shared),
                waiting: AtomicUsize::new(0),
                clock,
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.inner.config
    }

    /// The event publisher of this instance.
    pub fn events(&self) -> &EventPublisher<RateLimiterEvent> {
        &self.inner.events
    }

    pub fn metrics(&self) -> RateLimiterMetrics {
        let now = self.inner.clock.elapsed_nanos();
        let shared = self.inner.shared.lock().expect("rate limiter lock poisoned");
        RateLimiterMetrics {
            available_permissions: shared.available(
                now,
                self.inner.period_nanos,
                self.inner.nanos_per_permit,
                self.inner.config.burst_capacity(),
            ),
            number_of_waiting_threads: self.inner.waiting.load(Ordering::Relaxed),
            latest_wait: Duration::from_nanos(shared.latest_wait_nanos()),
        }
    }

    /// Replaces the per-period permit budget. Applies from the next
    /// reservation on; waits already assigned are unaffected.
    pub fn change_limit_for_period(&self, limit: u32) {
        assert!(limit >= 1, "limit_for_period must be at least 1");
        let mut shared = self.inner.shared.lock().expect("rate limiter lock poisoned");
        shared.limit_for_period = limit;
    }

    /// Replaces the acquisition timeout for future reservations.
    pub fn change_timeout_duration(&self, timeout: Duration) {
        let mut shared = self.inner.shared.lock().expect("rate limiter lock poisoned");
        shared.timeout_nanos = timeout.as_nanos() as u64;
    }

    fn reserve(&self, permits: u32, timeout_override: Option<u64>) -> Result<Duration, ()> {
        let now = self.inner.clock.elapsed_nanos();
        let result = {
            let mut shared = self.inner.shared.lock().expect("rate limiter lock poisoned");
            shared.reserve(
                now,
                permits,
                self.inner.period_nanos,
                self.inner.nanos_per_permit,
                self.inner.config.burst_capacity(),
                timeout_override,
            )
        };
        match result {
            Ok(wait_nanos) => {
                let wait = Duration::from_nanos(wait_nanos);
                self.inner.events.emit(&RateLimiterEvent::PermitsAcquired {
                    name: self.inner.name.clone(),
                    timestamp: self.inner.clock.now(),
                    permits,
                    wait,
                });

                #[cfg(feature = "metrics")]
                metrics::counter!(
                    "ratelimiter_permits_total",
                    "ratelimiter" => self.inner.name.clone(),
                    "outcome" => "acquired"
                )
                .increment(permits as u64);

                Ok(wait)
            }
            Err(()) => {
                self.inner.events.emit(&RateLimiterEvent::PermitsRejected {
                    name: self.inner.name.clone(),
                    timestamp: self.inner.clock.now(),
                    permits,
                });

                #[cfg(feature = "metrics")]
                metrics::counter!(
                    "ratelimiter_permits_total",
                    "ratelimiter" => self.inner.name.clone(),
                    "outcome" => "rejected"
                )
                .increment(permits as u64);

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    ratelimiter = %self.inner.name,
                    permits,
                    "permit reservation refused"
                );

                Err(())
            }
        }
    }

    fn refusal(&self) -> RequestNotPermittedError {
        RequestNotPermittedError {
            name: self.inner.name.clone(),
        }
    }

    /// Non-blocking acquisition: succeeds only when the permits are
    /// available right now, with no wait at all.
    pub fn try_acquire_permission(&self, permits: u32) -> bool {
        self.reserve(permits, Some(0)).is_ok()
    }

    /// Reserves `permits` within the configured timeout and returns the
    /// wait the caller owes before proceeding. Prefer
    /// [`Self::acquire_permission`], which sleeps the wait out itself.
    pub fn reserve_permission(&self, permits: u32) -> Result<Duration, RequestNotPermittedError> {
        self.reserve(permits, None).map_err(|()| self.refusal())
    }

    /// Acquires `permits`, sleeping out any reservation wait on the tokio
    /// timer. When this returns `Ok` the caller may proceed immediately.
    pub async fn acquire_permission(&self, permits: u32) -> Result<(), RequestNotPermittedError> {
        let wait = self.reserve_permission(permits)?;
        if !wait.is_zero() {
            self.inner.waiting.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(wait).await;
            self.inner.waiting.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Blocking form of [`Self::acquire_permission`] for synchronous
    /// callers; parks the thread for the reservation wait.
    pub fn acquire_permission_blocking(
        &self,
        permits: u32,
    ) -> Result<(), RequestNotPermittedError> {
        let wait = self.reserve_permission(permits)?;
        if !wait.is_zero() {
            self.inner.waiting.fetch_add(1, Ordering::Relaxed);
            std::thread::sleep(wait);
            self.inner.waiting.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Runs `op` behind one permit, blocking out any reservation wait.
    pub fn execute<T, E, F>(&self, op: F) -> Result<T, RateLimiterError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.acquire_permission_blocking(1)?;
        op().map_err(RateLimiterError::Inner)
    }

    /// Async form of [`Self::execute`].
    pub async fn execute_async<T, E, F, Fut>(&self, op: F) -> Result<T, RateLimiterError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire_permission(1).await?;
        op().await.map_err(RateLimiterError::Inner)
    }

    /// Wraps `op` so every invocation runs behind one permit.
    pub fn decorate<T, E, F>(&self, op: F) -> impl Fn() -> Result<T, RateLimiterError<E>>
    where
        F: Fn() -> Result<T, E>,
    {
        let limiter = self.clone();
        move || limiter.execute(&op)
    }

    /// Wraps an async operation factory so every invocation runs behind
    /// one permit.
    pub fn decorate_async<T, E, F, Fut>(
        &self,
        op: F,
    ) -> impl Fn() -> BoxFuture<'static, Result<T, RateLimiterError<E>>>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let limiter = self.clone();
        move || {
            let limiter = limiter.clone();
            let op = op.clone();
            async move { limiter.execute_async(op).await }.boxed()
        }
    }
}

/// Name-keyed cache of rate limiters sharing one configuration.
pub struct RateLimiterRegistry {
    registry: Registry<RateLimiter>,
    default_config: RateLimiterConfig,
}

impl RateLimiterRegistry {
    pub fn of(default_config: RateLimiterConfig) -> Self {
        Self {
            registry: Registry::new(),
            default_config,
        }
    }

    pub fn of_defaults() -> Self {
        Self::of(RateLimiterConfig::of_defaults())
    }

    pub fn get(&self, name: &str) -> Arc<RateLimiter> {
        self.registry
            .get_or_create(name, || RateLimiter::of(name, self.default_config.clone()))
    }

    pub fn get_with_config(&self, name: &str, config: RateLimiterConfig) -> Arc<RateLimiter> {
        self.registry
            .get_or_create(name, || RateLimiter::of(name, config))
    }

    pub fn find(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.registry.find(name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.registry.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }
}

impl std::fmt::Debug for RateLimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterRegistry")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
