//! A retry policy with pluggable backoff.
//!
//! A decorated operation is invoked up to `max_attempts` times. Errors are
//! filtered through predicates (retry, ignore), successful results can be
//! declared retryable, and the delay between attempts comes from an
//! [`IntervalFunction`] (fixed, exponential, jittered, or custom).
//!
//! The synchronous form sleeps the calling thread between attempts; the
//! async form sleeps on the tokio timer, so dropping the caller's future
//! cancels any pending delay and prevents further attempts.
//!
//! # Example
//!
//! ```
//! use breakwater_retry::{Retry, RetryConfig};
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::time::Duration;
//!
//! let attempts = AtomicU32::new(0);
//! let retry = Retry::of(
//!     "flaky",
//!     RetryConfig::builder()
//!         .max_attempts(3)
//!         .wait_duration(Duration::from_millis(1))
//!         .build(),
//! );
//!
//! let value: Result<u32, _> = retry.execute(|| {
//!     if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
//!         Err("not yet")
//!     } else {
//!         Ok(42)
//!     }
//! });
//! assert_eq!(value.unwrap(), 42);
//! ```

mod backoff;
mod config;
mod error;
mod events;

pub use backoff::{
    ExponentialBackoff, ExponentialRandomBackoff, FixedInterval, FnInterval, IntervalFunction,
};
pub use config::{RetryConfig, RetryConfigBuilder};
pub use error::{MaxRetriesExceededError, RetryError};
pub use events::RetryEvent;

use breakwater_core::{EventPublisher, Registry};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters over every call decorated by one retry instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryMetrics {
    pub number_of_total_calls: u64,
    pub number_of_successful_calls_without_retry: u64,
    pub number_of_successful_calls_with_retry: u64,
    pub number_of_failed_calls_without_retry: u64,
    pub number_of_failed_calls_with_retry: u64,
}

#[derive(Debug, Default)]
struct MetricCells {
    total: AtomicU64,
    success_without_retry: AtomicU64,
    success_with_retry: AtomicU64,
    failed_without_retry: AtomicU64,
    failed_with_retry: AtomicU64,
}

struct RetryInner<T, E> {
    name: String,
    config: RetryConfig<T, E>,
    metrics: MetricCells,
    events: EventPublisher<RetryEvent>,
}

/// A named retry instance.
///
/// Cheap to clone; clones share metrics and events. The retry loop itself
/// keeps no cross-call state, so one instance may decorate any number of
/// concurrent calls.
pub struct Retry<T, E> {
    inner: Arc<RetryInner<T, E>>,
}

impl<T, E> Clone for Retry<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> std::fmt::Debug for Retry<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry")
            .field("name", &self.inner.name)
            .field("max_attempts", &self.inner.config.max_attempts)
            .finish_non_exhaustive()
    }
}

/// What the loop decided to do with one attempt's outcome.
enum Verdict {
    Done,
    RetryAfter(Duration),
    GiveUp,
    Propagate { counted: bool },
}

impl<T, E> Retry<T, E> {
    /// Creates a retry instance named `name` from `config`.
    pub fn of(name: impl Into<String>, config: RetryConfig<T, E>) -> Self {
        let events = config.events.fork();
        Self {
            inner: Arc::new(RetryInner {
                name: name.into(),
                config,
                metrics: MetricCells::default(),
                events,
            }),
        }
    }

    /// Creates a retry instance with the default configuration.
    pub fn of_defaults(name: impl Into<String>) -> Self {
        Self::of(name, RetryConfig::of_defaults())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &RetryConfig<T, E> {
        &self.inner.config
    }

    /// The event publisher of this instance.
    pub fn events(&self) -> &EventPublisher<RetryEvent> {
        &self.inner.events
    }

    pub fn metrics(&self) -> RetryMetrics {
        let cells = &self.inner.metrics;
        RetryMetrics {
            number_of_total_calls: cells.total.load(Ordering::Relaxed),
            number_of_successful_calls_without_retry: cells
                .success_without_retry
                .load(Ordering::Relaxed),
            number_of_successful_calls_with_retry: cells.success_with_retry.load(Ordering::Relaxed),
            number_of_failed_calls_without_retry: cells
                .failed_without_retry
                .load(Ordering::Relaxed),
            number_of_failed_calls_with_retry: cells.failed_with_retry.load(Ordering::Relaxed),
        }
    }

    fn emit_retry(&self, attempt: usize, delay: Duration) {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            retry = %self.inner.name,
            attempt,
            delay_ms = delay.as_millis(),
            "retrying after delay"
        );

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "retry_attempts_total",
            "retry" => self.inner.name.clone()
        )
        .increment(1);

        self.inner.events.emit(&RetryEvent::Retry {
            name: self.inner.name.clone(),
            timestamp: std::time::Instant::now(),
            attempt,
            delay,
        });
    }

    fn record_success(&self, attempts: usize) {
        self.inner.metrics.total.fetch_add(1, Ordering::Relaxed);
        if attempts == 1 {
            self.inner
                .metrics
                .success_without_retry
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner
                .metrics
                .success_with_retry
                .fetch_add(1, Ordering::Relaxed);
        }

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "retry_calls_total",
            "retry" => self.inner.name.clone(),
            "result" => "success"
        )
        .increment(1);

        self.inner.events.emit(&RetryEvent::Success {
            name: self.inner.name.clone(),
            timestamp: std::time::Instant::now(),
            attempts,
        });
    }

    fn record_exhausted(&self, attempts: usize) {
        self.inner.metrics.total.fetch_add(1, Ordering::Relaxed);
        if attempts == 1 {
            self.inner
                .metrics
                .failed_without_retry
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner
                .metrics
                .failed_with_retry
                .fetch_add(1, Ordering::Relaxed);
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(retry = %self.inner.name, attempts, "retry attempts exhausted");

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "retry_calls_total",
            "retry" => self.inner.name.clone(),
            "result" => "exhausted"
        )
        .increment(1);

        self.inner.events.emit(&RetryEvent::Error {
            name: self.inner.name.clone(),
            timestamp: std::time::Instant::now(),
            attempts,
        });
    }

    fn record_not_retried(&self, counted: bool) {
        if counted {
            self.inner.metrics.total.fetch_add(1, Ordering::Relaxed);
            self.inner
                .metrics
                .failed_without_retry
                .fetch_add(1, Ordering::Relaxed);
        }
        self.inner.events.emit(&RetryEvent::IgnoredError {
            name: self.inner.name.clone(),
            timestamp: std::time::Instant::now(),
        });
    }

    /// Decides what to do with a successful result on `attempt`.
    fn judge_result(&self, value: &T, attempt: usize) -> Verdict {
        let retryable = self
            .inner
            .config
            .retry_on_result
            .as_ref()
            .is_some_and(|predicate| predicate(value));
        if !retryable {
            return Verdict::Done;
        }
        if attempt >= self.inner.config.max_attempts {
            return Verdict::GiveUp;
        }
        Verdict::RetryAfter(self.inner.config.interval_fn.interval(attempt))
    }

    /// Decides what to do with a failed result on `attempt`.
    fn judge_error(&self, error: &E, attempt: usize) -> Verdict {
        if (self.inner.config.ignore_error)(error) {
            return Verdict::Propagate { counted: false };
        }
        if !(self.inner.config.retry_on_error)(error) {
            return Verdict::Propagate { counted: true };
        }
        if attempt >= self.inner.config.max_attempts {
            return Verdict::GiveUp;
        }
        Verdict::RetryAfter(self.inner.config.interval_fn.interval(attempt))
    }

    fn exhausted_by_result(&self, attempts: usize) -> Option<RetryError<E>> {
        self.record_exhausted(attempts);
        if self.inner.config.fail_after_max_attempts {
            Some(RetryError::MaxRetriesExceeded(MaxRetriesExceededError {
                name: self.inner.name.clone(),
                attempts,
            }))
        } else {
            None
        }
    }

    /// Runs `op` under this policy, sleeping the calling thread between
    /// attempts.
    pub fn execute<F>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => match self.judge_result(&value, attempt) {
                    Verdict::Done => {
                        self.record_success(attempt);
                        return Ok(value);
                    }
                    Verdict::GiveUp => {
                        return match self.exhausted_by_result(attempt) {
                            Some(error) => Err(error),
                            None => Ok(value),
                        };
                    }
                    Verdict::RetryAfter(delay) => {
                        self.emit_retry(attempt, delay);
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                    Verdict::Propagate { .. } => unreachable!("results are never propagated"),
                },
                Err(error) => match self.judge_error(&error, attempt) {
                    Verdict::Propagate { counted } => {
                        self.record_not_retried(counted);
                        return Err(RetryError::Inner(error));
                    }
                    Verdict::GiveUp => {
                        self.record_exhausted(attempt);
                        return Err(RetryError::Inner(error));
                    }
                    Verdict::RetryAfter(delay) => {
                        self.emit_retry(attempt, delay);
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                    Verdict::Done => unreachable!("errors never complete a call"),
                },
            }
        }
    }

    /// Async form of [`Self::execute`]; delays run on the tokio timer.
    /// Dropping the returned future cancels any pending delay and stops
    /// further attempts.
    pub async fn execute_async<F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => match self.judge_result(&value, attempt) {
                    Verdict::Done => {
                        self.record_success(attempt);
                        return Ok(value);
                    }
                    Verdict::GiveUp => {
                        return match self.exhausted_by_result(attempt) {
                            Some(error) => Err(error),
                            None => Ok(value),
                        };
                    }
                    Verdict::RetryAfter(delay) => {
                        self.emit_retry(attempt, delay);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Verdict::Propagate { .. } => unreachable!("results are never propagated"),
                },
                Err(error) => match self.judge_error(&error, attempt) {
                    Verdict::Propagate { counted } => {
                        self.record_not_retried(counted);
                        return Err(RetryError::Inner(error));
                    }
                    Verdict::GiveUp => {
                        self.record_exhausted(attempt);
                        return Err(RetryError::Inner(error));
                    }
                    Verdict::RetryAfter(delay) => {
                        self.emit_retry(attempt, delay);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Verdict::Done => unreachable!("errors never complete a call"),
                },
            }
        }
    }

    /// Wraps `op` so every invocation runs under this policy.
    pub fn decorate<F>(&self, op: F) -> impl Fn() -> Result<T, RetryError<E>>
    where
        F: Fn() -> Result<T, E>,
    {
        let retry = self.clone();
        move || retry.execute(&op)
    }

    /// Wraps an async operation factory so every invocation runs under
    /// this policy.
    pub fn decorate_async<F, Fut>(
        &self,
        op: F,
    ) -> impl Fn() -> BoxFuture<'static, Result<T, RetryError<E>>>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let retry = self.clone();
        move || {
            let retry = retry.clone();
            let op = op.clone();
            async move { retry.execute_async(op).await }.boxed()
        }
    }
}

/// Name-keyed cache of retry instances sharing one configuration.
pub struct RetryRegistry<T, E> {
    registry: Registry<Retry<T, E>>,
    default_config: RetryConfig<T, E>,
}

impl<T, E> RetryRegistry<T, E> {
    pub fn of(default_config: RetryConfig<T, E>) -> Self {
        Self {
            registry: Registry::new(),
            default_config,
        }
    }

    pub fn of_defaults() -> Self {
        Self::of(RetryConfig::of_defaults())
    }

    pub fn get(&self, name: &str) -> Arc<Retry<T, E>> {
        self.registry
            .get_or_create(name, || Retry::of(name, self.default_config.clone()))
    }

    pub fn get_with_config(&self, name: &str, config: RetryConfig<T, E>) -> Arc<Retry<T, E>> {
        self.registry.get_or_create(name, || Retry::of(name, config))
    }

    pub fn find(&self, name: &str) -> Option<Arc<Retry<T, E>>> {
        self.registry.find(name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Retry<T, E>>> {
        self.registry.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }
}

impl<T, E> std::fmt::Debug for RetryRegistry<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryRegistry")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
