//! Sliding-window call aggregation.
//!
//! Two window shapes share one snapshot contract: [`CountWindow`] keeps the
//! last N calls in a ring of slots, [`TimeWindow`] keeps per-second partial
//! aggregates over the last N seconds. Both maintain running aggregates on
//! write so a snapshot is O(1) over the count variant and O(window seconds)
//! over the time variant.
//!
//! Rates are percentages in `[0, 100]`; below `minimum_number_of_calls`
//! recorded outcomes they are [`NOT_ENOUGH_DATA`] and must not participate
//! in threshold checks.

use std::time::Duration;

/// Sentinel rate meaning "fewer than `minimum_number_of_calls` recorded".
pub const NOT_ENOUGH_DATA: f32 = -1.0;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// The recorded kind of one call. Ignored outcomes never reach a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Failure,
}

/// Point-in-time aggregate of a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSnapshot {
    pub total_calls: u32,
    pub successful_calls: u32,
    pub failed_calls: u32,
    pub slow_calls: u32,
    pub total_duration: Duration,
    /// Failed percentage of total, or [`NOT_ENOUGH_DATA`].
    pub failure_rate: f32,
    /// Slow percentage of total, or [`NOT_ENOUGH_DATA`].
    pub slow_call_rate: f32,
}

impl WindowSnapshot {
    fn from_aggregate(agg: &Aggregate, minimum_number_of_calls: u32) -> Self {
        let (failure_rate, slow_call_rate) = if agg.total < minimum_number_of_calls {
            (NOT_ENOUGH_DATA, NOT_ENOUGH_DATA)
        } else {
            (
                100.0 * agg.failed as f32 / agg.total as f32,
                100.0 * agg.slow as f32 / agg.total as f32,
            )
        };
        Self {
            total_calls: agg.total,
            successful_calls: agg.total - agg.failed,
            failed_calls: agg.failed,
            slow_calls: agg.slow,
            total_duration: Duration::from_nanos(agg.duration_nanos),
            failure_rate,
            slow_call_rate,
        }
    }

    /// An empty snapshot (rates at the sentinel unless `minimum` is zero).
    pub fn empty(minimum_number_of_calls: u32) -> Self {
        Self::from_aggregate(&Aggregate::default(), minimum_number_of_calls.max(1))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Aggregate {
    total: u32,
    failed: u32,
    slow: u32,
    duration_nanos: u64,
}

impl Aggregate {
    fn add(&mut self, kind: OutcomeKind, duration: Duration, slow: bool) {
        self.total += 1;
        if kind == OutcomeKind::Failure {
            self.failed += 1;
        }
        if slow {
            self.slow += 1;
        }
        self.duration_nanos = self
            .duration_nanos
            .saturating_add(duration.as_nanos() as u64);
    }

    fn subtract_slot(&mut self, slot: &Slot) {
        self.total -= 1;
        if slot.failed {
            self.failed -= 1;
        }
        if slot.slow {
            self.slow -= 1;
        }
        self.duration_nanos = self.duration_nanos.saturating_sub(slot.duration_nanos);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    occupied: bool,
    failed: bool,
    slow: bool,
    duration_nanos: u64,
}

/// Ring buffer over the last N calls.
///
/// A monotonic write index selects `index % N`; the evicted occupant is
/// subtracted from the running aggregate before the new outcome is added,
/// so reads never walk the ring.
#[derive(Debug)]
pub struct CountWindow {
    slots: Box<[Slot]>,
    next: u64,
    aggregate: Aggregate,
    minimum_number_of_calls: u32,
}

impl CountWindow {
    /// `size` must be at least 1; `minimum_number_of_calls` is clamped to
    /// at least 1.
    pub fn new(size: u32, minimum_number_of_calls: u32) -> Self {
        assert!(size >= 1, "window size must be at least 1");
        Self {
            slots: vec![Slot::default(); size as usize].into_boxed_slice(),
            next: 0,
            aggregate: Aggregate::default(),
            minimum_number_of_calls: minimum_number_of_calls.max(1),
        }
    }

    pub fn record(&mut self, kind: OutcomeKind, duration: Duration, slow: bool) {
        let index = (self.next % self.slots.len() as u64) as usize;
        self.next += 1;

        let slot = &mut self.slots[index];
        if slot.occupied {
            let evicted = *slot;
            self.aggregate.subtract_slot(&evicted);
        }
        *slot = Slot {
            occupied: true,
            failed: kind == OutcomeKind::Failure,
            slow,
            duration_nanos: duration.as_nanos() as u64,
        };
        self.aggregate.add(kind, duration, slow);
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot::from_aggregate(&self.aggregate, self.minimum_number_of_calls)
    }

    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = Slot::default());
        self.next = 0;
        self.aggregate = Aggregate::default();
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct EpochBucket {
    /// Second index this bucket currently aggregates, or `u64::MAX` if empty.
    epoch_second: u64,
    aggregate: Aggregate,
}

impl EpochBucket {
    const EMPTY: u64 = u64::MAX;
}

/// Ring of per-second partial aggregates over the last N seconds.
///
/// Recording into the current second evicts any bucket whose epoch fell out
/// of the window; snapshots sum the live buckets only.
#[derive(Debug)]
pub struct TimeWindow {
    buckets: Box<[EpochBucket]>,
    minimum_number_of_calls: u32,
}

impl TimeWindow {
    /// `window_seconds` must be at least 1.
    pub fn new(window_seconds: u32, minimum_number_of_calls: u32) -> Self {
        assert!(window_seconds >= 1, "window must span at least one second");
        let empty = EpochBucket {
            epoch_second: EpochBucket::EMPTY,
            aggregate: Aggregate::default(),
        };
        Self {
            buckets: vec![empty; window_seconds as usize].into_boxed_slice(),
            minimum_number_of_calls: minimum_number_of_calls.max(1),
        }
    }

    fn window_seconds(&self) -> u64 {
        self.buckets.len() as u64
    }

    pub fn record(&mut self, now_nanos: u64, kind: OutcomeKind, duration: Duration, slow: bool) {
        let second = now_nanos / NANOS_PER_SECOND;
        let index = (second % self.window_seconds()) as usize;
        let bucket = &mut self.buckets[index];
        if bucket.epoch_second != second {
            bucket.epoch_second = second;
            bucket.aggregate = Aggregate::default();
        }
        bucket.aggregate.add(kind, duration, slow);
    }

    pub fn snapshot(&self, now_nanos: u64) -> WindowSnapshot {
        let second = now_nanos / NANOS_PER_SECOND;
        let oldest_live = second.saturating_sub(self.window_seconds() - 1);

        let mut sum = Aggregate::default();
        for bucket in self.buckets.iter() {
            if bucket.epoch_second == EpochBucket::EMPTY
                || bucket.epoch_second < oldest_live
                || bucket.epoch_second > second
            {
                continue;
            }
            sum.total += bucket.aggregate.total;
            sum.failed += bucket.aggregate.failed;
            sum.slow += bucket.aggregate.slow;
            sum.duration_nanos = sum.duration_nanos.saturating_add(bucket.aggregate.duration_nanos);
        }
        WindowSnapshot::from_aggregate(&sum, self.minimum_number_of_calls)
    }

    pub fn reset(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.epoch_second = EpochBucket::EMPTY;
            bucket.aggregate = Aggregate::default();
        }
    }
}

/// Count- or time-based window behind one recording surface.
#[derive(Debug)]
pub enum SlidingWindow {
    Count(CountWindow),
    Time(TimeWindow),
}

impl SlidingWindow {
    pub fn count_based(size: u32, minimum_number_of_calls: u32) -> Self {
        SlidingWindow::Count(CountWindow::new(size, minimum_number_of_calls))
    }

    pub fn time_based(window_seconds: u32, minimum_number_of_calls: u32) -> Self {
        SlidingWindow::Time(TimeWindow::new(window_seconds, minimum_number_of_calls))
    }

    /// Records one outcome. `now_nanos` is only read by the time variant.
    pub fn record(&mut self, now_nanos: u64, kind: OutcomeKind, duration: Duration, slow: bool) {
        match self {
            SlidingWindow::Count(w) => w.record(kind, duration, slow),
            SlidingWindow::Time(w) => w.record(now_nanos, kind, duration, slow),
        }
    }

    pub fn snapshot(&self, now_nanos: u64) -> WindowSnapshot {
        match self {
            SlidingWindow::Count(w) => w.snapshot(),
            SlidingWindow::Time(w) => w.snapshot(now_nanos),
        }
    }

    pub fn reset(&mut self) {
        match self {
            SlidingWindow::Count(w) => w.reset(),
            SlidingWindow::Time(w) => w.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn empty_window_reports_sentinel_rates() {
        let window = CountWindow::new(5, 5);
        let snap = window.snapshot();
        assert_eq!(snap.total_calls, 0);
        assert_eq!(snap.failure_rate, NOT_ENOUGH_DATA);
        assert_eq!(snap.slow_call_rate, NOT_ENOUGH_DATA);
    }

    #[test]
    fn rates_stay_at_sentinel_below_minimum() {
        let mut window = CountWindow::new(10, 5);
        for _ in 0..4 {
            window.record(OutcomeKind::Failure, MS, false);
        }
        assert_eq!(window.snapshot().failure_rate, NOT_ENOUGH_DATA);

        window.record(OutcomeKind::Failure, MS, false);
        assert_eq!(window.snapshot().failure_rate, 100.0);
    }

    #[test]
    fn count_window_totals_balance() {
        let mut window = CountWindow::new(5, 1);
        window.record(OutcomeKind::Failure, MS, false);
        window.record(OutcomeKind::Failure, MS, true);
        window.record(OutcomeKind::Success, MS, true);

        let snap = window.snapshot();
        assert_eq!(snap.total_calls, 3);
        assert_eq!(snap.failed_calls, 2);
        assert_eq!(snap.successful_calls, 1);
        assert_eq!(snap.slow_calls, 2);
        assert_eq!(snap.total_duration, 3 * MS);
        assert_eq!(snap.failure_rate, 100.0 * 2.0 / 3.0);
    }

    #[test]
    fn count_window_evicts_oldest() {
        let mut window = CountWindow::new(3, 1);
        window.record(OutcomeKind::Failure, 10 * MS, true);
        window.record(OutcomeKind::Success, MS, false);
        window.record(OutcomeKind::Success, MS, false);
        // Evicts the failure.
        window.record(OutcomeKind::Success, MS, false);

        let snap = window.snapshot();
        assert_eq!(snap.total_calls, 3);
        assert_eq!(snap.failed_calls, 0);
        assert_eq!(snap.slow_calls, 0);
        assert_eq!(snap.failure_rate, 0.0);
        assert_eq!(snap.total_duration, 3 * MS);
    }

    #[test]
    fn count_window_reset_round_trip() {
        let mut window = CountWindow::new(3, 2);
        window.record(OutcomeKind::Failure, MS, false);
        window.reset();

        window.record(OutcomeKind::Success, MS, false);
        let snap = window.snapshot();
        assert_eq!(snap.total_calls, 1);
        assert_eq!(snap.successful_calls, 1);
        assert_eq!(snap.failed_calls, 0);
        assert_eq!(snap.failure_rate, NOT_ENOUGH_DATA);
    }

    fn secs(n: u64) -> u64 {
        n * NANOS_PER_SECOND
    }

    #[test]
    fn time_window_sums_live_epochs() {
        let mut window = TimeWindow::new(3, 1);
        window.record(secs(0), OutcomeKind::Failure, MS, false);
        window.record(secs(1), OutcomeKind::Success, MS, false);
        window.record(secs(2), OutcomeKind::Success, MS, false);

        let snap = window.snapshot(secs(2));
        assert_eq!(snap.total_calls, 3);
        assert_eq!(snap.failed_calls, 1);
    }

    #[test]
    fn time_window_drops_stale_epochs() {
        let mut window = TimeWindow::new(3, 1);
        window.record(secs(0), OutcomeKind::Failure, MS, false);
        window.record(secs(1), OutcomeKind::Failure, MS, false);

        // Seconds 0 and 1 have fallen out of [2, 4].
        let snap = window.snapshot(secs(4));
        assert_eq!(snap.total_calls, 0);

        // Recording at second 3 reuses the bucket second 0 occupied.
        window.record(secs(3), OutcomeKind::Success, MS, false);
        let snap = window.snapshot(secs(3));
        assert_eq!(snap.total_calls, 2);
        assert_eq!(snap.failed_calls, 1);
    }

    #[test]
    fn time_window_bucket_overwrite_clears_old_counts() {
        let mut window = TimeWindow::new(2, 1);
        window.record(secs(0), OutcomeKind::Failure, MS, false);
        // Same ring slot as second 0 (0 % 2 == 2 % 2).
        window.record(secs(2), OutcomeKind::Success, MS, false);

        let snap = window.snapshot(secs(2));
        assert_eq!(snap.total_calls, 1);
        assert_eq!(snap.failed_calls, 0);
    }

    #[test]
    fn slow_never_exceeds_total() {
        let mut window = CountWindow::new(4, 1);
        for _ in 0..10 {
            window.record(OutcomeKind::Success, MS, true);
            let snap = window.snapshot();
            assert!(snap.slow_calls <= snap.total_calls);
            assert_eq!(snap.total_calls, snap.successful_calls + snap.failed_calls);
        }
    }
}
