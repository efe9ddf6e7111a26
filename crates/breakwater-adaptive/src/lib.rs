//! A bulkhead whose concurrency limit adapts to observed outcomes.
//!
//! Wraps a [`SemaphoreBulkhead`] with a mutable limit and drives that limit
//! with an AIMD congestion-control loop fed by a sliding window of call
//! outcomes: grow fast while healthy (`SlowStart`), grow carefully and
//! shrink hard once failures or slow calls cross their thresholds
//! (`CongestionAvoidance`).
//!
//! # Example
//!
//! ```
//! use breakwater_adaptive::{AdaptiveBulkhead, AdaptiveBulkheadConfig};
//! use std::time::Duration;
//!
//! let bulkhead = AdaptiveBulkhead::of(
//!     "downstream",
//!     AdaptiveBulkheadConfig::builder()
//!         .initial_limit(4)
//!         .minimum_number_of_calls(2)
//!         .build(),
//! );
//!
//! assert!(bulkhead.try_acquire_permission());
//! bulkhead.on_success(Duration::from_millis(3));
//! ```

mod config;
mod controller;
mod events;

pub use config::{AdaptiveBulkheadConfig, AdaptiveBulkheadConfigBuilder};
pub use controller::AdaptiveState;
pub use events::AdaptiveBulkheadEvent;

use breakwater_bulkhead::{BulkheadConfig, BulkheadError, BulkheadFullError, SemaphoreBulkhead};
use breakwater_core::window::WindowSnapshot;
use breakwater_core::{Clock, EventPublisher, OutcomeKind, Registry, SystemClock};
use controller::Controller;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Point-in-time view of an adaptive bulkhead.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveBulkheadMetrics {
    pub state: AdaptiveState,
    pub current_limit: usize,
    pub window: WindowSnapshot,
}

struct AdaptiveInner {
    name: String,
    config: AdaptiveBulkheadConfig,
    bulkhead: SemaphoreBulkhead,
    controller: Mutex<Controller>,
    clock: Arc<dyn Clock>,
    events: EventPublisher<AdaptiveBulkheadEvent>,
}

/// A named adaptive bulkhead instance.
///
/// Cheap to clone; clones share the inner bulkhead and control loop.
pub struct AdaptiveBulkhead {
    inner: Arc<AdaptiveInner>,
}

impl Clone for AdaptiveBulkhead {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for AdaptiveBulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveBulkhead")
            .field("name", &self.inner.name)
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

impl AdaptiveBulkhead {
    /// Creates an adaptive bulkhead named `name` from `config`.
    pub fn of(name: impl Into<String>, config: AdaptiveBulkheadConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock::new()))
    }

    /// Creates an adaptive bulkhead with the default configuration.
    pub fn of_defaults(name: impl Into<String>) -> Self {
        Self::of(name, AdaptiveBulkheadConfig::of_defaults())
    }

    /// Creates an adaptive bulkhead on an injected clock (used by the
    /// decorators to time calls).
    pub fn with_clock(
        name: impl Into<String>,
        config: AdaptiveBulkheadConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        let inner_config = BulkheadConfig::builder()
            .max_concurrent_calls(config.initial_limit)
            .max_wait_duration(config.max_wait_duration)
            .build();
        let bulkhead = SemaphoreBulkhead::of(name.clone(), inner_config);
        let controller = Controller::new(&config);
        let events = config.events.fork();
        Self {
            inner: Arc::new(AdaptiveInner {
                name,
                config,
                bulkhead,
                controller: Mutex::new(controller),
                clock,
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &AdaptiveBulkheadConfig {
        &self.inner.config
    }

    /// The event publisher of the control loop. Admission events are on
    /// [`Self::bulkhead`]'s publisher.
    pub fn events(&self) -> &EventPublisher<AdaptiveBulkheadEvent> {
        &self.inner.events
    }

    /// The wrapped semaphore bulkhead.
    pub fn bulkhead(&self) -> &SemaphoreBulkhead {
        &self.inner.bulkhead
    }

    pub fn metrics(&self) -> AdaptiveBulkheadMetrics {
        let controller = self.inner.controller.lock().expect("controller poisoned");
        AdaptiveBulkheadMetrics {
            state: controller.state(),
            current_limit: controller.limit(),
            window: controller.snapshot(),
        }
    }

    /// Non-blocking admission attempt against the current limit.
    pub fn try_acquire_permission(&self) -> bool {
        self.inner.bulkhead.try_acquire_permission()
    }

    /// Awaits a permit, bounded by the configured wait budget.
    pub async fn acquire_permission(&self) -> Result<(), BulkheadFullError> {
        self.inner.bulkhead.acquire_permission().await
    }

    /// Blocking form of [`Self::acquire_permission`].
    pub fn acquire_permission_blocking(&self) -> Result<(), BulkheadFullError> {
        self.inner.bulkhead.acquire_permission_blocking()
    }

    /// Records a successful call, releases its permit, and adapts the
    /// limit.
    pub fn on_success(&self, duration: Duration) {
        self.record(OutcomeKind::Success, duration);
        self.inner.bulkhead.on_complete();
    }

    /// Records a failed call, releases its permit, and adapts the limit.
    pub fn on_error(&self, duration: Duration) {
        self.record(OutcomeKind::Failure, duration);
        self.inner.bulkhead.on_complete();
    }

    fn record(&self, kind: OutcomeKind, duration: Duration) {
        let adjustment = {
            let mut controller = self.inner.controller.lock().expect("controller poisoned");
            controller.record(&self.inner.config, kind, duration)
        };

        if let Some(new_limit) = adjustment.new_limit {
            self.inner.bulkhead.change_config(new_limit);

            #[cfg(feature = "tracing")]
            tracing::info!(
                bulkhead = %self.inner.name,
                new_limit,
                increased = adjustment.increased,
                "adaptive limit changed"
            );

            #[cfg(feature = "metrics")]
            metrics::gauge!(
                "adaptive_bulkhead_limit",
                "bulkhead" => self.inner.name.clone()
            )
            .set(new_limit as f64);

            let event = if adjustment.increased {
                AdaptiveBulkheadEvent::LimitIncreased {
                    name: self.inner.name.clone(),
                    timestamp: self.inner.clock.now(),
                    new_limit,
                }
            } else {
                AdaptiveBulkheadEvent::LimitDecreased {
                    name: self.inner.name.clone(),
                    timestamp: self.inner.clock.now(),
                    new_limit,
                }
            };
            self.inner.events.emit(&event);
        }

        if let Some((from, to)) = adjustment.transition {
            self.inner.events.emit(&AdaptiveBulkheadEvent::StateTransition {
                name: self.inner.name.clone(),
                timestamp: self.inner.clock.now(),
                from,
                to,
            });
        }
    }

    /// Runs `op` behind a permit, recording its outcome into the control
    /// loop.
    pub fn execute<T, E, F>(&self, op: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.acquire_permission_blocking()?;
        let started = self.inner.clock.now();
        let result = op();
        let duration = self.inner.clock.now().saturating_duration_since(started);
        match &result {
            Ok(_) => self.on_success(duration),
            Err(_) => self.on_error(duration),
        }
        result.map_err(BulkheadError::Inner)
    }

    /// Async form of [`Self::execute`].
    pub async fn execute_async<T, E, F, Fut>(&self, op: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire_permission().await?;
        let started = self.inner.clock.now();
        let result = op().await;
        let duration = self.inner.clock.now().saturating_duration_since(started);
        match &result {
            Ok(_) => self.on_success(duration),
            Err(_) => self.on_error(duration),
        }
        result.map_err(BulkheadError::Inner)
    }

    /// Wraps `op` so every invocation runs behind a permit and feeds the
    /// control loop.
    pub fn decorate<T, E, F>(&self, op: F) -> impl Fn() -> Result<T, BulkheadError<E>>
    where
        F: Fn() -> Result<T, E>,
    {
        let bulkhead = self.clone();
        move || bulkhead.execute(&op)
    }

    /// Wraps an async operation factory so every invocation runs behind a
    /// permit and feeds the control loop.
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

/// Name-keyed cache of adaptive bulkheads sharing one configuration.
pub struct AdaptiveBulkheadRegistry {
    registry: Registry<AdaptiveBulkhead>,
    default_config: AdaptiveBulkheadConfig,
}

impl AdaptiveBulkheadRegistry {
    pub fn of(default_config: AdaptiveBulkheadConfig) -> Self {
        Self {
            registry: Registry::new(),
            default_config,
        }
    }

    pub fn of_defaults() -> Self {
        Self::of(AdaptiveBulkheadConfig::of_defaults())
    }

    pub fn get(&self, name: &str) -> Arc<AdaptiveBulkhead> {
        self.registry.get_or_create(name, || {
            AdaptiveBulkhead::of(name, self.default_config.clone())
        })
    }

    pub fn get_with_config(
        &self,
        name: &str,
        config: AdaptiveBulkheadConfig,
    ) -> Arc<AdaptiveBulkhead> {
        self.registry
            .get_or_create(name, || AdaptiveBulkhead::of(name, config))
    }

    pub fn find(&self, name: &str) -> Option<Arc<AdaptiveBulkhead>> {
        self.registry.find(name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<AdaptiveBulkhead>> {
        self.registry.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }
}

impl std::fmt::Debug for AdaptiveBulkheadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveBulkheadRegistry")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
