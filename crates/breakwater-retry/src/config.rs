use crate::backoff::{
    ExponentialBackoff, ExponentialRandomBackoff, FixedInterval, IntervalFunction,
};
use crate::events::RetryEvent;
use breakwater_core::events::{EventPublisher, FnListener};
use std::sync::Arc;
use std::time::Duration;

type ErrorPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type ResultPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Immutable configuration of a retry policy.
///
/// `T` is the success type of decorated operations (consulted by the
/// optional result predicate), `E` their error type.
pub struct RetryConfig<T, E> {
    pub(crate) max_attempts: usize,
    pub(crate) interval_fn: Arc<dyn IntervalFunction>,
    pub(crate) retry_on_error: ErrorPredicate<E>,
    pub(crate) ignore_error: ErrorPredicate<E>,
    pub(crate) retry_on_result: Option<ResultPredicate<T>>,
    pub(crate) fail_after_max_attempts: bool,
    pub(crate) events: EventPublisher<RetryEvent>,
}

impl<T, E> RetryConfig<T, E> {
    pub fn builder() -> RetryConfigBuilder<T, E> {
        RetryConfigBuilder::new()
    }

    pub fn of_defaults() -> Self {
        Self::builder().build()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn fail_after_max_attempts(&self) -> bool {
        self.fail_after_max_attempts
    }
}

impl<T, E> Clone for RetryConfig<T, E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            interval_fn: Arc::clone(&self.interval_fn),
            retry_on_error: Arc::clone(&self.retry_on_error),
            ignore_error: Arc::clone(&self.ignore_error),
            retry_on_result: self.retry_on_result.clone(),
            fail_after_max_attempts: self.fail_after_max_attempts,
            events: self.events.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for RetryConfig<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("fail_after_max_attempts", &self.fail_after_max_attempts)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RetryConfig`].
pub struct RetryConfigBuilder<T, E> {
    max_attempts: usize,
    interval_fn: Arc<dyn IntervalFunction>,
    retry_on_error: ErrorPredicate<E>,
    ignore_error: ErrorPredicate<E>,
    retry_on_result: Option<ResultPredicate<T>>,
    fail_after_max_attempts: bool,
    events: EventPublisher<RetryEvent>,
}

impl<T, E> RetryConfigBuilder<T, E> {
    /// Defaults: 3 attempts, fixed 500ms between them, every error
    /// retried.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            interval_fn: Arc::new(FixedInterval::new(Duration::from_millis(500))),
            retry_on_error: Arc::new(|_| true),
            ignore_error: Arc::new(|_| false),
            retry_on_result: None,
            fail_after_max_attempts: false,
            events: EventPublisher::new(),
        }
    }

    /// Total invocation budget, including the initial attempt. Must be at
    /// least 1.
    ///
    /// Default: 3
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Fixed delay between attempts.
    ///
    /// Default: 500ms
    pub fn wait_duration(mut self, duration: Duration) -> Self {
        self.interval_fn = Arc::new(FixedInterval::new(duration));
        self
    }

    /// Exponential backoff `initial * multiplier^(n-1)`.
    pub fn exponential_backoff(mut self, initial: Duration, multiplier: f64) -> Self {
        self.interval_fn = Arc::new(ExponentialBackoff::new(initial).with_multiplier(multiplier));
        self
    }

    /// Exponential backoff with uniform jitter.
    pub fn exponential_random_backoff(
        mut self,
        initial: Duration,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        self.interval_fn = Arc::new(
            ExponentialRandomBackoff::new(initial, randomization_factor)
                .with_multiplier(multiplier),
        );
        self
    }

    /// A custom interval function.
    pub fn interval_function<I>(mut self, interval_fn: I) -> Self
    where
        I: IntervalFunction + 'static,
    {
        self.interval_fn = Arc::new(interval_fn);
        self
    }

    /// Which errors are worth retrying. Errors failing this predicate
    /// propagate immediately.
    ///
    /// Default: every error
    pub fn retry_on_error<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_on_error = Arc::new(predicate);
        self
    }

    /// Which errors are ignored outright: propagated immediately without
    /// touching the retry metrics. Checked before the retry predicate.
    ///
    /// Default: none
    pub fn ignore_error<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.ignore_error = Arc::new(predicate);
        self
    }

    /// Treat matching successful results as retryable failures.
    ///
    /// Default: no result is retried
    pub fn retry_on_result<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.retry_on_result = Some(Arc::new(predicate));
        self
    }

    /// When the attempt budget is exhausted by a retryable *result*,
    /// surface [`crate::RetryError::MaxRetriesExceeded`] instead of
    /// returning that last result.
    ///
    /// Default: false (the last result is returned)
    pub fn fail_after_max_attempts(mut self, fail: bool) -> Self {
        self.fail_after_max_attempts = fail;
        self
    }

    /// Register a callback fired before each retry.
    pub fn on_retry<F>(self, f: F) -> Self
    where
        F: Fn(usize, Duration) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &RetryEvent| {
                if let RetryEvent::Retry { attempt, delay, .. } = event {
                    f(*attempt, *delay);
                }
            }));
        self
    }

    /// Register a callback for completed operations.
    pub fn on_success<F>(self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &RetryEvent| {
                if let RetryEvent::Success { attempts, .. } = event {
                    f(*attempts);
                }
            }));
        self
    }

    /// Register a callback for exhausted operations.
    pub fn on_error<F>(self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &RetryEvent| {
                if let RetryEvent::Error { attempts, .. } = event {
                    f(*attempts);
                }
            }));
        self
    }

    /// Register a callback for errors that were not retried.
    pub fn on_ignored_error<F>(self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &RetryEvent| {
                if matches!(event, RetryEvent::IgnoredError { .. }) {
                    f();
                }
            }));
        self
    }

    /// Builds the configuration.
    ///
    /// # Panics
    ///
    /// Panics when `max_attempts` is zero.
    pub fn build(self) -> RetryConfig<T, E> {
        assert!(self.max_attempts >= 1, "max_attempts must be at least 1");
        RetryConfig {
            max_attempts: self.max_attempts,
            interval_fn: self.interval_fn,
            retry_on_error: self.retry_on_error,
            ignore_error: self.ignore_error,
            retry_on_result: self.retry_on_result,
            fail_after_max_attempts: self.fail_after_max_attempts,
            events: self.events,
        }
    }
}

impl<T, E> Default for RetryConfigBuilder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RetryConfig::<(), ()>::of_defaults();
        assert_eq!(config.max_attempts(), 3);
        assert!(!config.fail_after_max_attempts());
        assert!(config.retry_on_result.is_none());
    }

    #[test]
    #[should_panic(expected = "max_attempts")]
    fn rejects_zero_attempts() {
        let _ = RetryConfig::<(), ()>::builder().max_attempts(0).build();
    }

    #[test]
    fn builder_composes() {
        let config = RetryConfig::<u32, std::io::Error>::builder()
            .max_attempts(5)
            .exponential_backoff(Duration::from_millis(100), 2.0)
            .retry_on_error(|e| e.kind() == std::io::ErrorKind::TimedOut)
            .retry_on_result(|value| *value == 0)
            .build();
        assert_eq!(config.max_attempts(), 5);
        assert!(config.retry_on_result.is_some());
    }
}
