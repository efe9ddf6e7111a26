use crate::events::BulkheadEvent;
use breakwater_core::events::{EventPublisher, FnListener};
use std::time::Duration;

/// Immutable configuration of a semaphore bulkhead.
#[derive(Clone)]
pub struct BulkheadConfig {
    pub(crate) max_concurrent_calls: usize,
    pub(crate) max_wait_duration: Option<Duration>,
    pub(crate) events: EventPublisher<BulkheadEvent>,
}

impl BulkheadConfig {
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::new()
    }

    pub fn of_defaults() -> Self {
        Self::builder().build()
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.max_concurrent_calls
    }

    /// `None` means blocking acquisitions wait indefinitely;
    /// `Some(Duration::ZERO)` makes them fail immediately when full.
    pub fn max_wait_duration(&self) -> Option<Duration> {
        self.max_wait_duration
    }
}

impl std::fmt::Debug for BulkheadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkheadConfig")
            .field("max_concurrent_calls", &self.max_concurrent_calls)
            .field("max_wait_duration", &self.max_wait_duration)
            .finish_non_exhaustive()
    }
}

/// Builder for [`BulkheadConfig`].
pub struct BulkheadConfigBuilder {
    max_concurrent_calls: usize,
    max_wait_duration: Option<Duration>,
    events: EventPublisher<BulkheadEvent>,
}

impl BulkheadConfigBuilder {
    /// Defaults: 25 concurrent calls, no waiting (acquisitions fail
    /// immediately when the bulkhead is full).
    pub fn new() -> Self {
        Self {
            max_concurrent_calls: 25,
            max_wait_duration: Some(Duration::ZERO),
            events: EventPublisher::new(),
        }
    }

    /// Maximum in-flight calls. Must be at least 1.
    ///
    /// Default: 25
    pub fn max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max;
        self
    }

    /// How long a blocking acquisition may wait for a permit. `None`
    /// waits indefinitely.
    ///
    /// Default: `Some(Duration::ZERO)`
    pub fn max_wait_duration(mut self, duration: Option<Duration>) -> Self {
        self.max_wait_duration = duration;
        self
    }

    /// Register a callback for admitted calls.
    pub fn on_call_permitted<F>(self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &BulkheadEvent| {
                if let BulkheadEvent::CallPermitted {
                    concurrent_calls, ..
                } = event
                {
                    f(*concurrent_calls);
                }
            }));
        self
    }

    /// Register a callback for refused calls.
    pub fn on_call_rejected<F>(self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &BulkheadEvent| {
                if let BulkheadEvent::CallRejected {
                    max_concurrent_calls,
                    ..
                } = event
                {
                    f(*max_concurrent_calls);
                }
            }));
        self
    }

    /// Register a callback for released permits.
    pub fn on_call_finished<F>(self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &BulkheadEvent| {
                if matches!(event, BulkheadEvent::CallFinished { .. }) {
                    f();
                }
            }));
        self
    }

    /// Builds the configuration.
    ///
    /// # Panics
    ///
    /// Panics when `max_concurrent_calls` is zero.
    pub fn build(self) -> BulkheadConfig {
        assert!(
            self.max_concurrent_calls >= 1,
            "max_concurrent_calls must be at least 1"
        );
        BulkheadConfig {
            max_concurrent_calls: self.max_concurrent_calls,
            max_wait_duration: self.max_wait_duration,
            events: self.events,
        }
    }
}

impl Default for BulkheadConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable configuration of a thread-pool bulkhead.
#[derive(Clone)]
pub struct ThreadPoolBulkheadConfig {
    pub(crate) core_thread_pool_size: usize,
    pub(crate) max_thread_pool_size: usize,
    pub(crate) queue_capacity: usize,
    pub(crate) keep_alive_duration: Duration,
    pub(crate) events: EventPublisher<BulkheadEvent>,
}

impl ThreadPoolBulkheadConfig {
    pub fn builder() -> ThreadPoolBulkheadConfigBuilder {
        ThreadPoolBulkheadConfigBuilder::new()
    }

    pub fn of_defaults() -> Self {
        Self::builder().build()
    }

    pub fn core_thread_pool_size(&self) -> usize {
        self.core_thread_pool_size
    }

    pub fn max_thread_pool_size(&self) -> usize {
        self.max_thread_pool_size
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Idle time after which a thread beyond the core size exits.
    pub fn keep_alive_duration(&self) -> Duration {
        self.keep_alive_duration
    }
}

impl std::fmt::Debug for ThreadPoolBulkheadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolBulkheadConfig")
            .field("core_thread_pool_size", &self.core_thread_pool_size)
            .field("max_thread_pool_size", &self.max_thread_pool_size)
            .field("queue_capacity", &self.queue_capacity)
            .field("keep_alive_duration", &self.keep_alive_duration)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ThreadPoolBulkheadConfig`].
pub struct ThreadPoolBulkheadConfigBuilder {
    core_thread_pool_size: Option<usize>,
    max_thread_pool_size: Option<usize>,
    queue_capacity: usize,
    keep_alive_duration: Duration,
    events: EventPublisher<BulkheadEvent>,
}

impl ThreadPoolBulkheadConfigBuilder {
    /// Defaults: max pool of `available_parallelism`, core pool one below
    /// that, queue of 100, 20ms keep-alive.
    pub fn new() -> Self {
        Self {
            core_thread_pool_size: None,
            max_thread_pool_size: None,
            queue_capacity: 100,
            keep_alive_duration: Duration::from_millis(20),
            events: EventPublisher::new(),
        }
    }

    /// Threads kept alive even when idle. Must be at least 1 and at most
    /// the maximum pool size.
    pub fn core_thread_pool_size(mut self, size: usize) -> Self {
        self.core_thread_pool_size = Some(size);
        self
    }

    /// Upper bound on pool threads.
    pub fn max_thread_pool_size(mut self, size: usize) -> Self {
        self.max_thread_pool_size = Some(size);
        self
    }

    /// Tasks that may sit queued waiting for a thread.
    ///
    /// Default: 100
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Idle time after which threads beyond the core size exit.
    ///
    /// Default: 20ms
    pub fn keep_alive_duration(mut self, duration: Duration) -> Self {
        self.keep_alive_duration = duration;
        self
    }

    /// Register a callback for admitted submissions.
    pub fn on_call_permitted<F>(self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &BulkheadEvent| {
                if let BulkheadEvent::CallPermitted {
                    concurrent_calls, ..
                } = event
                {
                    f(*concurrent_calls);
                }
            }));
        self
    }

    /// Register a callback for refused submissions.
    pub fn on_call_rejected<F>(self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &BulkheadEvent| {
                if let BulkheadEvent::CallRejected {
                    max_concurrent_calls,
                    ..
                } = event
                {
                    f(*max_concurrent_calls);
                }
            }));
        self
    }

    /// Register a callback for completed tasks.
    pub fn on_call_finished<F>(self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &BulkheadEvent| {
                if matches!(event, BulkheadEvent::CallFinished { .. }) {
                    f();
                }
            }));
        self
    }

    /// Builds the configuration.
    ///
    /// # Panics
    ///
    /// Panics when the pool sizes are zero or inconsistent.
    pub fn build(self) -> ThreadPoolBulkheadConfig {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let max = self.max_thread_pool_size.unwrap_or(parallelism).max(1);
        let core = self
            .core_thread_pool_size
            .unwrap_or_else(|| max.saturating_sub(1).max(1));

        assert!(core >= 1, "core_thread_pool_size must be at least 1");
        assert!(
            core <= max,
            "core_thread_pool_size must not exceed max_thread_pool_size"
        );

        ThreadPoolBulkheadConfig {
            core_thread_pool_size: core,
            max_thread_pool_size: max,
            queue_capacity: self.queue_capacity,
            keep_alive_duration: self.keep_alive_duration,
            events: self.events,
        }
    }
}

impl Default for ThreadPoolBulkheadConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semaphore_defaults() {
        let config = BulkheadConfig::of_defaults();
        assert_eq!(config.max_concurrent_calls(), 25);
        assert_eq!(config.max_wait_duration(), Some(Duration::ZERO));
    }

    #[test]
    #[should_panic(expected = "max_concurrent_calls")]
    fn semaphore_rejects_zero_limit() {
        let _ = BulkheadConfig::builder().max_concurrent_calls(0).build();
    }

    #[test]
    fn pool_defaults_are_consistent() {
        let config = ThreadPoolBulkheadConfig::of_defaults();
        assert!(config.core_thread_pool_size() >= 1);
        assert!(config.core_thread_pool_size() <= config.max_thread_pool_size());
        assert_eq!(config.queue_capacity(), 100);
    }

    #[test]
    #[should_panic(expected = "core_thread_pool_size")]
    fn pool_rejects_core_above_max() {
        let _ = ThreadPoolBulkheadConfig::builder()
            .core_thread_pool_size(4)
            .max_thread_pool_size(2)
            .build();
    }
}
