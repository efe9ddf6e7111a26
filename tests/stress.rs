//! Contention tests: exactness of aggregates and permit accounting under
//! parallel callers.

use breakwater_bulkhead::{BulkheadConfig, SemaphoreBulkhead};
use breakwater_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use breakwater_retry::{Retry, RetryConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Parallel recording loses no updates: the window total equals the
/// number of recorded outcomes.
#[test]
fn parallel_recording_is_exact() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;

    let breaker = Arc::new(CircuitBreaker::<()>::of(
        "stress",
        CircuitBreakerConfig::builder()
            .failure_rate_threshold(100.0)
            .sliding_window_size(THREADS as u32 * PER_THREAD as u32)
            .minimum_number_of_calls(THREADS as u32 * PER_THREAD as u32)
            .build(),
    ));

    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let breaker = Arc::clone(&breaker);
            std::thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    if i % 2 == 0 {
                        breaker.on_success(Duration::from_millis(1));
                    } else {
                        breaker.on_error(Duration::from_millis(1));
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let window = breaker.metrics().window;
    assert_eq!(window.total_calls as usize, THREADS * PER_THREAD);
    assert_eq!(window.successful_calls as usize, THREADS / 2 * PER_THREAD);
    assert_eq!(window.failed_calls as usize, THREADS / 2 * PER_THREAD);
}

/// Racing callers against a tripping breaker: exactly one transition to
/// Open happens, and every caller either recorded or was refused.
#[test]
fn threshold_crossing_races_cleanly() {
    const THREADS: usize = 8;

    let transitions = Arc::new(AtomicUsize::new(0));
    let t = Arc::clone(&transitions);
    let breaker = Arc::new(CircuitBreaker::<()>::of(
        "stress",
        CircuitBreakerConfig::builder()
            .failure_rate_threshold(50.0)
            .sliding_window_size(16)
            .minimum_number_of_calls(16)
            .on_state_transition(move |_, to| {
                if to == CircuitState::Open {
                    t.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build(),
    ));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let breaker = Arc::clone(&breaker);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let _ = breaker.execute(|| Err::<(), _>(()));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(transitions.load(Ordering::SeqCst), 1);
}

/// Permit accounting survives a storm of acquire/release cycles.
#[test]
fn bulkhead_accounting_survives_contention() {
    const LIMIT: usize = 3;

    let bulkhead = Arc::new(SemaphoreBulkhead::of(
        "stress",
        BulkheadConfig::builder()
            .max_concurrent_calls(LIMIT)
            .max_wait_duration(Some(Duration::ZERO))
            .build(),
    ));
    let admitted = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let holding = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..12)
        .map(|_| {
            let bulkhead = Arc::clone(&bulkhead);
            let admitted = Arc::clone(&admitted);
            let peak = Arc::clone(&peak);
            let holding = Arc::clone(&holding);
            std::thread::spawn(move || {
                for _ in 0..300 {
                    if bulkhead.try_acquire_permission() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                        let now = holding.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::hint::spin_loop();
                        holding.fetch_sub(1, Ordering::SeqCst);
                        bulkhead.on_complete();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= LIMIT);
    assert!(admitted.load(Ordering::SeqCst) > 0);
    assert_eq!(bulkhead.metrics().available_concurrent_calls, LIMIT);
}

/// A shared retry instance keeps exact metrics across concurrent
/// decorated calls.
#[test]
fn retry_metrics_are_exact_under_parallel_calls() {
    const THREADS: usize = 6;
    const PER_THREAD: usize = 50;

    let retry: Arc<Retry<(), &'static str>> = Arc::new(Retry::of(
        "stress",
        RetryConfig::builder()
            .max_attempts(2)
            .wait_duration(Duration::from_micros(10))
            .build(),
    ));

    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let retry = Arc::clone(&retry);
            std::thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    if i % 2 == 0 {
                        let _ = retry.execute(|| Ok(()));
                    } else {
                        let _ = retry.execute(|| Err::<(), _>("always"));
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let metrics = retry.metrics();
    assert_eq!(metrics.number_of_total_calls as usize, THREADS * PER_THREAD);
    assert_eq!(
        metrics.number_of_successful_calls_without_retry as usize,
        THREADS / 2 * PER_THREAD
    );
    assert_eq!(
        metrics.number_of_failed_calls_with_retry as usize,
        THREADS / 2 * PER_THREAD
    );
}
