//! Property-based checks over the windows, limiters, and backoff
//! functions.
//!
//! Run with: cargo test --test property_tests

use breakwater_core::window::{CountWindow, OutcomeKind, TimeWindow};
use breakwater_core::{Clock, MockClock, NOT_ENOUGH_DATA};
use breakwater_ratelimiter::{RateLimiter, RateLimiterConfig};
use breakwater_retry::{ExponentialBackoff, IntervalFunction};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn outcome_strategy() -> impl Strategy<Value = (bool, bool, u64)> {
    // (is_failure, is_slow, duration_millis)
    (any::<bool>(), any::<bool>(), 0u64..10_000)
}

proptest! {
    /// SW-1: total = success + failure and slow <= total, for any record
    /// sequence over a count window.
    #[test]
    fn count_window_aggregates_balance(
        size in 1u32..64,
        outcomes in prop::collection::vec(outcome_strategy(), 0..256),
    ) {
        let mut window = CountWindow::new(size, 1);
        for (failed, slow, millis) in outcomes {
            let kind = if failed { OutcomeKind::Failure } else { OutcomeKind::Success };
            window.record(kind, Duration::from_millis(millis), slow);

            let snap = window.snapshot();
            prop_assert_eq!(snap.total_calls, snap.successful_calls + snap.failed_calls);
            prop_assert!(snap.slow_calls <= snap.total_calls);
            prop_assert!(snap.total_calls <= size);
            if snap.failure_rate >= 0.0 {
                prop_assert!(snap.failure_rate <= 100.0);
                prop_assert!(snap.slow_call_rate <= 100.0);
            } else {
                prop_assert_eq!(snap.failure_rate, NOT_ENOUGH_DATA);
            }
        }
    }

    /// The same invariants hold for the time window under arbitrary
    /// clock jumps.
    #[test]
    fn time_window_aggregates_balance(
        window_seconds in 1u32..16,
        steps in prop::collection::vec((outcome_strategy(), 0u64..5_000), 0..128),
    ) {
        let mut window = TimeWindow::new(window_seconds, 1);
        let mut now_nanos = 0u64;
        for ((failed, slow, millis), advance_millis) in steps {
            now_nanos += advance_millis * 1_000_000;
            let kind = if failed { OutcomeKind::Failure } else { OutcomeKind::Success };
            window.record(now_nanos, kind, Duration::from_millis(millis), slow);

            let snap = window.snapshot(now_nanos);
            prop_assert_eq!(snap.total_calls, snap.successful_calls + snap.failed_calls);
            prop_assert!(snap.slow_calls <= snap.total_calls);
            prop_assert!(snap.total_calls >= 1);
        }
    }

    /// RL-1: whatever the request pattern, one refresh period never
    /// grants more than the limit.
    #[test]
    fn rate_limiter_cycle_budget_holds(
        limit in 1u32..20,
        requests in prop::collection::vec(1u32..4, 1..64),
    ) {
        let clock = Arc::new(MockClock::new());
        let limiter = RateLimiter::with_clock(
            "prop",
            RateLimiterConfig::builder()
                .limit_for_period(limit)
                .limit_refresh_period(Duration::from_secs(1))
                .timeout_duration(Duration::ZERO)
                .build(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );

        let mut granted = 0u32;
        for permits in requests {
            if limiter.try_acquire_permission(permits) {
                granted += permits;
            }
        }
        prop_assert!(granted <= limit);

        // The next cycle gets a full budget again, and no more.
        clock.advance(Duration::from_secs(1));
        let mut next_cycle = 0u32;
        for _ in 0..(limit * 3) {
            if limiter.try_acquire_permission(1) {
                next_cycle += 1;
            }
        }
        prop_assert_eq!(next_cycle, limit);
    }

    /// Exponential backoff is monotone in the attempt number and honors
    /// its cap.
    #[test]
    fn exponential_backoff_is_monotone_and_capped(
        initial_millis in 1u64..1_000,
        multiplier in 1.0f64..4.0,
        cap_millis in 1u64..60_000,
        attempt in 1usize..20,
    ) {
        let backoff = ExponentialBackoff::new(Duration::from_millis(initial_millis))
            .with_multiplier(multiplier)
            .with_max_interval(Duration::from_millis(cap_millis));

        let current = backoff.interval(attempt);
        let next = backoff.interval(attempt + 1);
        prop_assert!(next >= current);
        prop_assert!(current <= Duration::from_millis(cap_millis));
    }
}
