//! Concurrency-limiting bulkheads.
//!
//! Two variants:
//!
//! - [`SemaphoreBulkhead`] caps the number of in-flight calls on the
//!   caller's own thread or task, with an optional bounded wait for a
//!   permit.
//! - [`ThreadPoolBulkhead`] isolates work on an owned worker pool with a
//!   bounded queue and hands the caller an awaitable [`TaskHandle`].
//!
//! # Example
//!
//! ```
//! use breakwater_bulkhead::{BulkheadConfig, SemaphoreBulkhead};
//! use std::time::Duration;
//!
//! let bulkhead = SemaphoreBulkhead::of(
//!     "downstream",
//!     BulkheadConfig::builder()
//!         .max_concurrent_calls(1)
//!         .max_wait_duration(Some(Duration::ZERO))
//!         .build(),
//! );
//!
//! assert!(bulkhead.try_acquire_permission());
//! assert!(!bulkhead.try_acquire_permission());
//! bulkhead.on_complete();
//! assert!(bulkhead.try_acquire_permission());
//! ```

mod config;
mod error;
mod events;
mod semaphore;
mod thread_pool;

pub use config::{
    BulkheadConfig, BulkheadConfigBuilder, ThreadPoolBulkheadConfig,
    ThreadPoolBulkheadConfigBuilder,
};
pub use error::{BulkheadError, BulkheadFullError, TaskCanceledError};
pub use events::BulkheadEvent;
pub use semaphore::{BulkheadMetrics, BulkheadRegistry, SemaphoreBulkhead};
pub use thread_pool::{TaskHandle, ThreadPoolBulkhead, ThreadPoolBulkheadMetrics};
