//! Overhead of each primitive on the happy path, where nothing trips,
//! waits, or retries.

use breakwater_bulkhead::{BulkheadConfig, SemaphoreBulkhead};
use breakwater_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig};
use breakwater_ratelimiter::{RateLimiter, RateLimiterConfig};
use breakwater_retry::{Retry, RetryConfig};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::time::Duration;

fn circuitbreaker_happy_path(c: &mut Criterion) {
    let breaker = CircuitBreaker::<()>::of_defaults("bench");
    c.bench_function("circuitbreaker_execute_ok", |b| {
        b.iter(|| {
            let result = breaker.execute(|| Ok::<_, ()>(black_box(42)));
            black_box(result).unwrap()
        })
    });
}

fn bulkhead_happy_path(c: &mut Criterion) {
    let bulkhead = SemaphoreBulkhead::of(
        "bench",
        BulkheadConfig::builder()
            .max_concurrent_calls(1024)
            .max_wait_duration(Some(Duration::ZERO))
            .build(),
    );
    c.bench_function("bulkhead_acquire_release", |b| {
        b.iter(|| {
            assert!(bulkhead.try_acquire_permission());
            bulkhead.on_complete();
        })
    });
}

fn ratelimiter_happy_path(c: &mut Criterion) {
    let limiter = RateLimiter::of(
        "bench",
        RateLimiterConfig::builder()
            .limit_for_period(1_000_000)
            .limit_refresh_period(Duration::from_secs(1))
            .timeout_duration(Duration::ZERO)
            .build(),
    );
    c.bench_function("ratelimiter_try_acquire", |b| {
        b.iter(|| black_box(limiter.try_acquire_permission(1)))
    });
}

fn retry_happy_path(c: &mut Criterion) {
    let retry: Retry<u64, ()> = Retry::of("bench", RetryConfig::of_defaults());
    c.bench_function("retry_execute_ok", |b| {
        b.iter(|| {
            let result = retry.execute(|| Ok(black_box(7)));
            black_box(result).unwrap()
        })
    });
}

criterion_group!(
    benches,
    circuitbreaker_happy_path,
    bulkhead_happy_path,
    ratelimiter_happy_path,
    retry_happy_path
);
criterion_main!(benches);
