//! Thread-pool bulkhead: work handed to an owned pool of worker threads.
//!
//! The pool grows from `core_thread_pool_size` to `max_thread_pool_size`
//! under load; threads beyond the core exit after `keep_alive_duration`
//! idle. A submission finding the queue full and the pool at its maximum is
//! refused with [`BulkheadFullError`]. Submissions return a [`TaskHandle`]
//! that can be awaited or joined for the task's value.
//!
//! Closing the bulkhead (or dropping it) stops intake, drains the queue
//! best-effort and joins the workers.

use crate::config::ThreadPoolBulkheadConfig;
use crate::error::{BulkheadFullError, TaskCanceledError};
use crate::events::BulkheadEvent;
use breakwater_core::EventPublisher;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolQueue {
    jobs: VecDeque<Job>,
    worker_count: usize,
    shutdown: bool,
}

struct PoolShared {
    name: String,
    config: ThreadPoolBulkheadConfig,
    queue: Mutex<PoolQueue>,
    work_ready: Condvar,
    events: EventPublisher<BulkheadEvent>,
}

impl PoolShared {
    fn emit_finished(&self) {
        self.events.emit(&BulkheadEvent::CallFinished {
            name: self.name.clone(),
            timestamp: Instant::now(),
        });

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "bulkhead_pool_tasks_finished_total",
            "bulkhead" => self.name.clone()
        )
        .increment(1);
    }
}

/// Point-in-time view of a thread-pool bulkhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadPoolBulkheadMetrics {
    pub queue_depth: usize,
    pub remaining_queue_capacity: usize,
    pub thread_count: usize,
}

/// Handle to a value produced on the pool.
///
/// Await it in async code or call [`TaskHandle::join`] from a thread. If
/// the task panicked or the pool shut down first, the handle reports
/// [`TaskCanceledError`].
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
    name: String,
}

impl<T> TaskHandle<T> {
    /// Blocks the calling thread until the task completes.
    pub fn join(self) -> Result<T, TaskCanceledError> {
        let name = self.name;
        self.rx
            .blocking_recv()
            .map_err(|_| TaskCanceledError { name })
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskCanceledError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let name = self.name.clone();
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| TaskCanceledError { name }))
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A named thread-pool bulkhead instance.
pub struct ThreadPoolBulkhead {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for ThreadPoolBulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolBulkhead")
            .field("name", &self.shared.name)
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

impl ThreadPoolBulkhead {
    /// Creates a pool bulkhead named `name` from `config`. Worker threads
    /// are started lazily as work arrives.
    pub fn of(name: impl Into<String>, config: ThreadPoolBulkheadConfig) -> Self {
        let events = config.events.fork();
        Self {
            shared: Arc::new(PoolShared {
                name: name.into(),
                config,
                queue: Mutex::new(PoolQueue {
                    jobs: VecDeque::new(),
                    worker_count: 0,
                    shutdown: false,
                }),
                work_ready: Condvar::new(),
                events,
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Creates a pool bulkhead with the default configuration.
    pub fn of_defaults(name: impl Into<String>) -> Self {
        Self::of(name, ThreadPoolBulkheadConfig::of_defaults())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &ThreadPoolBulkheadConfig {
        &self.shared.config
    }

    /// The event publisher of this instance.
    pub fn events(&self) -> &EventPublisher<BulkheadEvent> {
        &self.shared.events
    }

    pub fn metrics(&self) -> ThreadPoolBulkheadMetrics {
        let queue = self.shared.queue.lock().expect("pool queue poisoned");
        ThreadPoolBulkheadMetrics {
            queue_depth: queue.jobs.len(),
            remaining_queue_capacity: self.shared.config.queue_capacity.saturating_sub(queue.jobs.len()),
            thread_count: queue.worker_count,
        }
    }

    /// Submits `task` for execution on the pool.
    ///
    /// Admission follows the classic executor discipline: start a core
    /// thread if any are unstarted, else queue, else start an excess
    /// thread up to the maximum, else refuse.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, BulkheadFullError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let job: Job = Box::new(move || {
            // A panicking task drops `tx`, which cancels the handle; the
            // worker itself survives.
            if let Ok(value) = catch_unwind(AssertUnwindSafe(task)) {
                let _ = tx.send(value);
            }
            shared.emit_finished();
        });

        let admitted_depth = {
            let mut queue = self.shared.queue.lock().expect("pool queue poisoned");
            if queue.shutdown {
                None
            } else {
                let config = &self.shared.config;
                let mut admit = true;
                if queue.worker_count < config.core_thread_pool_size {
                    self.spawn_worker(&mut queue);
                } else if queue.jobs.len() >= config.queue_capacity {
                    if queue.worker_count < config.max_thread_pool_size {
                        self.spawn_worker(&mut queue);
                    } else {
                        admit = false;
                    }
                }
                if admit {
                    queue.jobs.push_back(job);
                    Some(queue.jobs.len())
                } else {
                    None
                }
            }
        };

        let Some(depth) = admitted_depth else {
            return Err(self.refuse());
        };
        self.shared.work_ready.notify_one();

        self.shared.events.emit(&BulkheadEvent::CallPermitted {
            name: self.shared.name.clone(),
            timestamp: Instant::now(),
            concurrent_calls: depth,
        });

        Ok(TaskHandle {
            rx,
            name: self.shared.name.clone(),
        })
    }

    fn refuse(&self) -> BulkheadFullError {
        self.shared.events.emit(&BulkheadEvent::CallRejected {
            name: self.shared.name.clone(),
            timestamp: Instant::now(),
            max_concurrent_calls: self.shared.config.max_thread_pool_size,
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(bulkhead = %self.shared.name, "thread pool bulkhead full");

        BulkheadFullError {
            name: self.shared.name.clone(),
            max_concurrent_calls: self.shared.config.max_thread_pool_size,
        }
    }

    fn spawn_worker(&self, queue: &mut PoolQueue) {
        queue.worker_count += 1;
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(format!("{}-worker", self.shared.name))
            .spawn(move || worker_loop(shared))
            .expect("failed to spawn bulkhead worker");
        self.workers
            .lock()
            .expect("pool workers poisoned")
            .push(handle);
    }

    /// Stops intake, lets queued jobs drain, and joins the workers.
    pub fn close(&self) {
        {
            let mut queue = self.shared.queue.lock().expect("pool queue poisoned");
            if queue.shutdown {
                return;
            }
            queue.shutdown = true;
        }
        self.shared.work_ready.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock().expect("pool workers poisoned"));
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPoolBulkhead {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    let keep_alive = shared.config.keep_alive_duration;
    let core_size = shared.config.core_thread_pool_size;
    loop {
        let job = {
            let mut queue = shared.queue.lock().expect("pool queue poisoned");
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.shutdown {
                    queue.worker_count -= 1;
                    break None;
                }
                if queue.worker_count > core_size {
                    let (next, timeout) = shared
                        .work_ready
                        .wait_timeout(queue, keep_alive)
                        .expect("pool queue poisoned");
                    queue = next;
                    // Re-check the count: another excess thread may have
                    // retired while this one slept.
                    if timeout.timed_out()
                        && queue.jobs.is_empty()
                        && queue.worker_count > core_size
                    {
                        queue.worker_count -= 1;
                        break None;
                    }
                } else {
                    queue = shared
                        .work_ready
                        .wait(queue)
                        .expect("pool queue poisoned");
                }
            }
        };
        match job {
            Some(job) => job(),
            None => return,
        }
    }
}
