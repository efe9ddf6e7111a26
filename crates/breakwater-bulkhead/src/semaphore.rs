//! Semaphore bulkhead: a bounded count of in-flight calls.
//!
//! Admission is a CAS loop over an atomic in-flight counter checked against
//! a mutable limit, so [`SemaphoreBulkhead::change_config`] applies to
//! future acquisitions atomically while in-flight calls are unaffected.
//! Blocking waiters park on a condvar, async waiters on a
//! [`tokio::sync::Notify`]; both are bounded by `max_wait_duration`.

use crate::config::BulkheadConfig;
use crate::error::{BulkheadError, BulkheadFullError};
use crate::events::BulkheadEvent;
use breakwater_core::{EventPublisher, Registry};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Point-in-time view of a semaphore bulkhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadMetrics {
    pub available_concurrent_calls: usize,
    pub max_allowed_concurrent_calls: usize,
}

struct SemaphoreInner {
    name: String,
    config: BulkheadConfig,
    max_concurrent_calls: AtomicUsize,
    in_flight: AtomicUsize,
    async_waiters: Notify,
    sync_gate: Mutex<()>,
    sync_waiters: Condvar,
    events: EventPublisher<BulkheadEvent>,
}

/// A named semaphore bulkhead instance.
///
/// Cheap to clone; clones share the same permit state.
pub struct SemaphoreBulkhead {
    inner: Arc<SemaphoreInner>,
}

impl Clone for SemaphoreBulkhead {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for SemaphoreBulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemaphoreBulkhead")
            .field("name", &self.inner.name)
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

impl SemaphoreBulkhead {
    /// Creates a bulkhead named `name` from `config`.
    pub fn of(name: impl Into<String>, config: BulkheadConfig) -> Self {
        let events = config.events.fork();
        Self {
            inner: Arc::new(SemaphoreInner {
                name: name.into(),
                max_concurrent_calls: AtomicUsize::new(config.max_concurrent_calls),
                config,
                in_flight: AtomicUsize::new(0),
                async_waiters: Notify::new(),
                sync_gate: Mutex::new(()),
                sync_waiters: Condvar::new(),
                events,
            }),
        }
    }

    /// Creates a bulkhead with the default configuration.
    pub fn of_defaults(name: impl Into<String>) -> Self {
        Self::of(name, BulkheadConfig::of_defaults())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.inner.config
    }

    /// The event publisher of this instance.
    pub fn events(&self) -> &EventPublisher<BulkheadEvent> {
        &self.inner.events
    }

    pub fn metrics(&self) -> BulkheadMetrics {
        let max = self.inner.max_concurrent_calls.load(Ordering::Acquire);
        let in_flight = self.inner.in_flight.load(Ordering::Acquire);
        BulkheadMetrics {
            available_concurrent_calls: max.saturating_sub(in_flight),
            max_allowed_concurrent_calls: max,
        }
    }

    /// Replaces the concurrency limit. Future acquisitions honor the new
    /// cap; in-flight calls are unaffected.
    pub fn change_config(&self, max_concurrent_calls: usize) {
        assert!(
            max_concurrent_calls >= 1,
            "max_concurrent_calls must be at least 1"
        );
        self.inner
            .max_concurrent_calls
            .store(max_concurrent_calls, Ordering::Release);
        // A raised limit may unblock parked waiters.
        self.inner.async_waiters.notify_waiters();
        let _gate = self.inner.sync_gate.lock().expect("bulkhead gate poisoned");
        self.inner.sync_waiters.notify_all();
    }

    fn try_acquire_internal(&self) -> bool {
        loop {
            let max = self.inner.max_concurrent_calls.load(Ordering::Acquire);
            let current = self.inner.in_flight.load(Ordering::Acquire);
            if current >= max {
                return false;
            }
            if self
                .inner
                .in_flight
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn emit_permitted(&self) {
        self.inner.events.emit(&BulkheadEvent::CallPermitted {
            name: self.inner.name.clone(),
            timestamp: Instant::now(),
            concurrent_calls: self.inner.in_flight.load(Ordering::Acquire),
        });

        #[cfg(feature = "metrics")]
        {
            metrics::counter!(
                "bulkhead_calls_permitted_total",
                "bulkhead" => self.inner.name.clone()
            )
            .increment(1);
            metrics::gauge!(
                "bulkhead_concurrent_calls",
                "bulkhead" => self.inner.name.clone()
            )
            .set(self.inner.in_flight.load(Ordering::Acquire) as f64);
        }
    }

    fn rejection(&self) -> BulkheadFullError {
        let max = self.inner.max_concurrent_calls.load(Ordering::Acquire);
        self.inner.events.emit(&BulkheadEvent::CallRejected {
            name: self.inner.name.clone(),
            timestamp: Instant::now(),
            max_concurrent_calls: max,
        });

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "bulkhead_calls_rejected_total",
            "bulkhead" => self.inner.name.clone()
        )
        .increment(1);

        #[cfg(feature = "tracing")]
        tracing::debug!(bulkhead = %self.inner.name, max, "bulkhead full");

        BulkheadFullError {
            name: self.inner.name.clone(),
            max_concurrent_calls: max,
        }
    }

    /// Non-blocking admission attempt.
    pub fn try_acquire_permission(&self) -> bool {
        if self.try_acquire_internal() {
            self.emit_permitted();
            true
        } else {
            let _ = self.rejection();
            false
        }
    }

    /// Parks the calling thread until a permit frees up or
    /// `max_wait_duration` elapses.
    pub fn acquire_permission_blocking(&self) -> Result<(), BulkheadFullError> {
        if self.try_acquire_internal() {
            self.emit_permitted();
            return Ok(());
        }

        match self.inner.config.max_wait_duration {
            Some(Duration::ZERO) => Err(self.rejection()),
            Some(max_wait) => {
                let deadline = Instant::now() + max_wait;
                let mut gate = self.inner.sync_gate.lock().expect("bulkhead gate poisoned");
                loop {
                    if self.try_acquire_internal() {
                        drop(gate);
                        self.emit_permitted();
                        return Ok(());
                    }
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()) else {
                        drop(gate);
                        return Err(self.rejection());
                    };
                    let (next_gate, _timeout) = self
                        .inner
                        .sync_waiters
                        .wait_timeout(gate, remaining)
                        .expect("bulkhead gate poisoned");
                    gate = next_gate;
                }
            }
            None => {
                let mut gate = self.inner.sync_gate.lock().expect("bulkhead gate poisoned");
                loop {
                    if self.try_acquire_internal() {
                        drop(gate);
                        self.emit_permitted();
                        return Ok(());
                    }
                    gate = self
                        .inner
                        .sync_waiters
                        .wait(gate)
                        .expect("bulkhead gate poisoned");
                }
            }
        }
    }

    /// Awaits a permit on the tokio timer, bounded by `max_wait_duration`.
    pub async fn acquire_permission(&self) -> Result<(), BulkheadFullError> {
        if self.try_acquire_internal() {
            self.emit_permitted();
            return Ok(());
        }

        match self.inner.config.max_wait_duration {
            Some(Duration::ZERO) => Err(self.rejection()),
            Some(max_wait) => {
                let deadline = tokio::time::Instant::now() + max_wait;
                loop {
                    let notified = self.inner.async_waiters.notified();
                    if self.try_acquire_internal() {
                        self.emit_permitted();
                        return Ok(());
                    }
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        // Deadline hit; one last chance in case a release
                        // raced the timeout.
                        if self.try_acquire_internal() {
                            self.emit_permitted();
                            return Ok(());
                        }
                        return Err(self.rejection());
                    }
                }
            }
            None => loop {
                let notified = self.inner.async_waiters.notified();
                if self.try_acquire_internal() {
                    self.emit_permitted();
                    return Ok(());
                }
                notified.await;
            },
        }
    }

    /// Releases exactly one permit and wakes a waiter.
    pub fn on_complete(&self) {
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.inner.events.emit(&BulkheadEvent::CallFinished {
            name: self.inner.name.clone(),
            timestamp: Instant::now(),
        });

        #[cfg(feature = "metrics")]
        metrics::gauge!(
            "bulkhead_concurrent_calls",
            "bulkhead" => self.inner.name.clone()
        )
        .set(self.inner.in_flight.load(Ordering::Acquire) as f64);

        self.inner.async_waiters.notify_one();
        let _gate = self.inner.sync_gate.lock().expect("bulkhead gate poisoned");
        self.inner.sync_waiters.notify_one();
    }

    /// Runs `op` behind a permit, releasing it on every path.
    pub fn execute<T, E, F>(&self, op: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.acquire_permission_blocking()?;
        let _release = ReleaseGuard { bulkhead: self };
        op().map_err(BulkheadError::Inner)
    }

    /// Async form of [`Self::execute`]. Dropping the returned future after
    /// admission still releases the permit.
    pub async fn execute_async<T, E, F, Fut>(&self, op: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire_permission().await?;
        let _release = ReleaseGuard { bulkhead: self };
        op().await.map_err(BulkheadError::Inner)
    }

    /// Wraps `op` so every invocation runs behind a permit.
    pub fn decorate<T, E, F>(&self, op: F) -> impl Fn() -> Result<T, BulkheadError<E>>
    where
        F: Fn() -> Result<T, E>,
    {
        let bulkhead = self.clone();
        move || bulkhead.execute(&op)
    }

    /// Wraps an async operation factory so every invocation runs behind a
    /// permit.
    pub fn decorate_async<T, E, F, Fut>(
        &self,
        op: F,
    ) -> impl Fn() -> BoxFuture<'static, Result<T, BulkheadError<E>>>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let bulkhead = self.clone();
        move || {
            let bulkhead = bulkhead.clone();
            let op = op.clone();
            async move { bulkhead.execute_async(op).await }.boxed()
        }
    }
}

struct ReleaseGuard<'a> {
    bulkhead: &'a SemaphoreBulkhead,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.bulkhead.on_complete();
    }
}

/// Name-keyed cache of semaphore bulkheads sharing one configuration.
pub struct BulkheadRegistry {
    registry: Registry<SemaphoreBulkhead>,
    default_config: BulkheadConfig,
}

impl BulkheadRegistry {
    pub fn of(default_config: BulkheadConfig) -> Self {
        Self {
            registry: Registry::new(),
            default_config,
        }
    }

    pub fn of_defaults() -> Self {
        Self::of(BulkheadConfig::of_defaults())
    }

    pub fn get(&self, name: &str) -> Arc<SemaphoreBulkhead> {
        self.registry.get_or_create(name, || {
            SemaphoreBulkhead::of(name, self.default_config.clone())
        })
    }

    pub fn get_with_config(&self, name: &str, config: BulkheadConfig) -> Arc<SemaphoreBulkhead> {
        self.registry
            .get_or_create(name, || SemaphoreBulkhead::of(name, config))
    }

    pub fn find(&self, name: &str) -> Option<Arc<SemaphoreBulkhead>> {
        self.registry.find(name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<SemaphoreBulkhead>> {
        self.registry.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }
}

impl std::fmt::Debug for BulkheadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkheadRegistry")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
