//! Retry behavior end to end: attempt budgets, backoff timing, predicate
//! filtering, composition with other decorators.

use breakwater_retry::{Retry, RetryConfig, RetryError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// RT-1: a decorated call invokes the operation between once and
/// `max_attempts` times.
#[test]
fn invocation_counts_stay_within_the_budget() {
    for failures_before_success in 0..5usize {
        let retry: Retry<(), &str> = Retry::of(
            "r",
            RetryConfig::builder()
                .max_attempts(3)
                .wait_duration(Duration::from_millis(1))
                .build(),
        );
        let calls = AtomicUsize::new(0);

        let _ = retry.execute(|| {
            if calls.fetch_add(1, Ordering::SeqCst) < failures_before_success {
                Err("flaky")
            } else {
                Ok(())
            }
        });

        let made = calls.load(Ordering::SeqCst);
        assert!(made >= 1, "at least one invocation");
        assert!(made <= 3, "no more than max_attempts, made {made}");
    }
}

/// Backoff timing: three attempts under exp(500ms, 2.0) sleep 500ms then
/// 1000ms, and the surfaced error is the third one.
#[tokio::test(start_paused = true)]
async fn exponential_backoff_timing_and_last_error() {
    let retry: Retry<(), String> = Retry::of(
        "r",
        RetryConfig::builder()
            .max_attempts(3)
            .exponential_backoff(Duration::from_millis(500), 2.0)
            .build(),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let started = tokio::time::Instant::now();
    let result = retry
        .execute_async(move || {
            let c = Arc::clone(&c);
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(format!("attempt {n} failed"))
            }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(1500));
    match result {
        Err(RetryError::Inner(message)) => assert_eq!(message, "attempt 3 failed"),
        other => panic!("unexpected: {other:?}"),
    }
}

/// RT-2 for the synchronous form, with real sleeping and a generous
/// tolerance.
#[test]
fn sync_backoff_actually_sleeps() {
    let retry: Retry<(), &str> = Retry::of(
        "r",
        RetryConfig::builder()
            .max_attempts(3)
            .wait_duration(Duration::from_millis(20))
            .build(),
    );

    let started = std::time::Instant::now();
    let _ = retry.execute(|| Err::<(), _>("always"));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(40), "slept {elapsed:?}");
}

#[test]
fn metrics_partition_by_outcome_and_retries() {
    let retry: Retry<u32, &str> = Retry::of(
        "r",
        RetryConfig::builder()
            .max_attempts(2)
            .wait_duration(Duration::from_millis(1))
            .build(),
    );

    // Immediate success.
    let _ = retry.execute(|| Ok(1));
    // Success after one retry.
    let calls = AtomicUsize::new(0);
    let _ = retry.execute(|| {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err("flaky")
        } else {
            Ok(2)
        }
    });
    // Exhaustion.
    let _ = retry.execute(|| Err::<u32, _>("always"));

    let metrics = retry.metrics();
    assert_eq!(metrics.number_of_total_calls, 3);
    assert_eq!(metrics.number_of_successful_calls_without_retry, 1);
    assert_eq!(metrics.number_of_successful_calls_with_retry, 1);
    assert_eq!(metrics.number_of_failed_calls_with_retry, 1);
    assert_eq!(metrics.number_of_failed_calls_without_retry, 0);
}

#[test]
fn result_predicate_drives_retries() {
    let retry: Retry<u32, &str> = Retry::of(
        "r",
        RetryConfig::builder()
            .max_attempts(4)
            .wait_duration(Duration::from_millis(1))
            .retry_on_result(|status: &u32| *status >= 500)
            .build(),
    );
    let calls = AtomicUsize::new(0);

    let value = retry.execute(|| {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Ok(503)
        } else {
            Ok(200)
        }
    });

    assert_eq!(value.unwrap(), 200);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// Composition: retry wrapped around a circuit breaker decorator, not
/// retrying the breaker's own refusals.
#[test]
fn retry_composes_with_a_circuit_breaker() {
    use breakwater_circuitbreaker::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    };

    let breaker = CircuitBreaker::of(
        "backend",
        CircuitBreakerConfig::builder()
            .failure_rate_threshold(50.0)
            .sliding_window_size(4)
            .minimum_number_of_calls(4)
            .build(),
    );
    let retry: Retry<(), CircuitBreakerError<&str>> = Retry::of(
        "backend",
        RetryConfig::builder()
            .max_attempts(10)
            .wait_duration(Duration::from_millis(1))
            .retry_on_error(|e: &CircuitBreakerError<&str>| !e.is_call_not_permitted())
            .build(),
    );

    let calls = AtomicUsize::new(0);
    let result = retry.execute(|| {
        calls.fetch_add(1, Ordering::SeqCst);
        breaker.execute(|| Err::<(), _>("down"))
    });

    // Four failures tripped the breaker; the fifth attempt was refused
    // and the refusal was not retried.
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn dropping_the_async_caller_cancels_pending_attempts() {
    let retry: Retry<(), &str> = Retry::of(
        "r",
        RetryConfig::builder()
            .max_attempts(5)
            .wait_duration(Duration::from_secs(3600))
            .build(),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let pending = retry.execute_async(move || {
        let c = Arc::clone(&c);
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("always")
        }
    });
    tokio::pin!(pending);
    let _ = futures::poll!(pending.as_mut());
    drop(pending);

    // One invocation happened; the hour-long delay died with the future.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
