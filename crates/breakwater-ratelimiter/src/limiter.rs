//! Permit reservation arithmetic.
//!
//! Two scheduling models behind one enum, selected by the configuration:
//!
//! - [`CycleState`] slices time since construction into cycles of
//!   `limit_refresh_period` and grants `limit_for_period` permits per
//!   cycle. Permissions may go negative: a caller reserving against a
//!   future cycle owes the wait until that cycle starts.
//! - [`RefillState`] replenishes continuously at one permit per
//!   `nanos_per_permit`, capped at a burst capacity.
//!
//! A reservation whose wait exceeds the timeout budget consumes nothing.

/// Outcome of a successful reservation: how long the caller must wait
/// before proceeding.
pub(crate) type ReserveOk = u64;

/// Cycle-sliced reservation state.
#[derive(Debug, Clone)]
pub(crate) struct CycleState {
    active_cycle: u64,
    active_permissions: i64,
    nanos_to_wait: u64,
}

impl CycleState {
    pub(crate) fn new(limit_for_period: u32) -> Self {
        Self {
            active_cycle: 0,
            active_permissions: limit_for_period as i64,
            nanos_to_wait: 0,
        }
    }

    /// Rolls the state forward to the cycle containing `now_nanos`.
    fn advance(&mut self, now_nanos: u64, period_nanos: u64, limit: u32) {
        let current_cycle = now_nanos / period_nanos;
        if current_cycle > self.active_cycle {
            let elapsed_cycles = (current_cycle - self.active_cycle) as i64;
            let accumulated = elapsed_cycles.saturating_mul(limit as i64);
            self.active_cycle = current_cycle;
            self.active_permissions =
                (self.active_permissions.saturating_add(accumulated)).min(limit as i64);
        }
    }

    fn nanos_until_available(
        &self,
        permits: u32,
        now_nanos: u64,
        period_nanos: u64,
        limit: u32,
    ) -> u64 {
        if self.active_permissions >= permits as i64 {
            return 0;
        }
        let next_cycle_start = (self.active_cycle + 1) * period_nanos;
        let nanos_to_next_cycle = next_cycle_start.saturating_sub(now_nanos);
        let permissions_at_next_cycle = self.active_permissions + limit as i64;
        let deficit = permits as i64 - permissions_at_next_cycle;
        let full_cycles_to_wait = if deficit <= 0 {
            0
        } else {
            (deficit + limit as i64 - 1) / limit as i64
        };
        (full_cycles_to_wait as u64).saturating_mul(period_nanos) + nanos_to_next_cycle
    }

    pub(crate) fn reserve(
        &mut self,
        now_nanos: u64,
        permits: u32,
        period_nanos: u64,
        limit: u32,
        timeout_nanos: u64,
    ) -> Result<ReserveOk, ()> {
        self.advance(now_nanos, period_nanos, limit);
        let wait = self.nanos_until_available(permits, now_nanos, period_nanos, limit);
        if wait > timeout_nanos {
            // Refused reservations take nothing from future cycles.
            self.nanos_to_wait = 0;
            return Err(());
        }
        self.active_permissions -= permits as i64;
        self.nanos_to_wait = wait;
        Ok(wait)
    }

    pub(crate) fn available(&self, now_nanos: u64, period_nanos: u64, limit: u32) -> i64 {
        let mut probe = self.clone();
        probe.advance(now_nanos, period_nanos, limit);
        probe.active_permissions
    }
}

/// Continuous-refill reservation state.
#[derive(Debug, Clone)]
pub(crate) struct RefillState {
    available_permissions: i64,
    last_update_nanos: u64,
}

impl RefillState {
    pub(crate) fn new(initial_permits: u32, now_nanos: u64) -> Self {
        Self {
            available_permissions: initial_permits as i64,
            last_update_nanos: now_nanos,
        }
    }

    fn refill(&mut self, now_nanos: u64, nanos_per_permit: u64, capacity: u32) {
        let elapsed = now_nanos.saturating_sub(self.last_update_nanos);
        let accrued = (elapsed / nanos_per_permit) as i64;
        if accrued > 0 {
            self.available_permissions =
                (self.available_permissions.saturating_add(accrued)).min(capacity as i64);
            // Keep the fractional remainder for the next refill.
            self.last_update_nanos += accrued as u64 * nanos_per_permit;
        }
    }

    pub(crate) fn reserve(
        &mut self,
        now_nanos: u64,
        permits: u32,
        nanos_per_permit: u64,
        capacity: u32,
        timeout_nanos: u64,
    ) -> Result<ReserveOk, ()> {
        self.refill(now_nanos, nanos_per_permit, capacity);
        if self.available_permissions >= permits as i64 {
            self.available_permissions -= permits as i64;
            return Ok(0);
        }
        let deficit = permits as i64 - self.available_permissions;
        let wait = (deficit as u64).saturating_mul(nanos_per_permit);
        if wait > timeout_nanos {
            return Err(());
        }
        self.available_permissions -= permits as i64;
        Ok(wait)
    }

    pub(crate) fn available(&self, now_nanos: u64, nanos_per_permit: u64, capacity: u32) -> i64 {
        let mut probe = self.clone();
        probe.refill(now_nanos, nanos_per_permit, capacity);
        probe.available_permissions
    }
}

/// Enum-dispatched reservation state; the variant is fixed at construction.
#[derive(Debug)]
pub(crate) enum LimiterState {
    Cycle(CycleState),
    Refill(RefillState),
}

/// Mutable half of a rate limiter: the reservation state plus the two
/// knobs that may be changed at runtime.
#[derive(Debug)]
pub(crate) struct LimiterShared {
    pub(crate) state: LimiterState,
    pub(crate) limit_for_period: u32,
    pub(crate) timeout_nanos: u64,
}

impl LimiterShared {
    pub(crate) fn reserve(
        &mut self,
        now_nanos: u64,
        permits: u32,
        period_nanos: u64,
        nanos_per_permit: u64,
        capacity: u32,
        timeout_override: Option<u64>,
    ) -> Result<ReserveOk, ()> {
        let timeout = timeout_override.unwrap_or(self.timeout_nanos);
        match &mut self.state {
            LimiterState::Cycle(cycle) => cycle.reserve(
                now_nanos,
                permits,
                period_nanos,
                self.limit_for_period,
                timeout,
            ),
            LimiterState::Refill(refill) => {
                refill.reserve(now_nanos, permits, nanos_per_permit, capacity, timeout)
            }
        }
    }

    /// Wait assigned to the most recent cycle reservation; zero for the
    /// refill variant, which never parks granted callers beyond their own
    /// reservation.
    pub(crate) fn latest_wait_nanos(&self) -> u64 {
        match &self.state {
            LimiterState::Cycle(cycle) => cycle.nanos_to_wait,
            LimiterState::Refill(_) => 0,
        }
    }

    pub(crate) fn available(
        &self,
        now_nanos: u64,
        period_nanos: u64,
        nanos_per_permit: u64,
        capacity: u32,
    ) -> i64 {
        match &self.state {
            LimiterState::Cycle(cycle) => {
                cycle.available(now_nanos, period_nanos, self.limit_for_period)
            }
            LimiterState::Refill(refill) => refill.available(now_nanos, nanos_per_permit, capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: u64 = 1_000_000_000;

    #[test]
    fn cycle_grants_up_to_limit_within_one_cycle() {
        let mut state = CycleState::new(3);
        for _ in 0..3 {
            assert_eq!(state.reserve(0, 1, SECOND, 3, 0), Ok(0));
        }
        assert_eq!(state.reserve(0, 1, SECOND, 3, 0), Err(()));
    }

    #[test]
    fn cycle_refreshes_on_next_cycle() {
        let mut state = CycleState::new(1);
        assert_eq!(state.reserve(0, 1, SECOND, 1, 0), Ok(0));
        assert_eq!(state.reserve(10, 1, SECOND, 1, 0), Err(()));
        assert_eq!(state.reserve(SECOND, 1, SECOND, 1, 0), Ok(0));
    }

    #[test]
    fn cycle_reservation_waits_until_next_cycle() {
        let mut state = CycleState::new(1);
        assert_eq!(state.reserve(0, 1, SECOND, 1, SECOND), Ok(0));
        // One permit owed from the next cycle: wait the remainder of this
        // one.
        let wait = state.reserve(SECOND / 4, 1, SECOND, 1, SECOND).unwrap();
        assert_eq!(wait, 3 * SECOND / 4);
        assert_eq!(state.active_permissions, -1);
    }

    #[test]
    fn cycle_rejection_consumes_nothing() {
        let mut state = CycleState::new(2);
        assert_eq!(state.reserve(0, 2, SECOND, 2, 0), Ok(0));
        let before = state.active_permissions;
        assert_eq!(state.reserve(0, 1, SECOND, 2, 0), Err(()));
        assert_eq!(state.active_permissions, before);
        // The next cycle still has its full budget.
        assert_eq!(state.reserve(SECOND, 2, SECOND, 2, 0), Ok(0));
    }

    #[test]
    fn cycle_accumulation_is_capped_at_limit() {
        let mut state = CycleState::new(4);
        assert_eq!(state.reserve(0, 1, SECOND, 4, 0), Ok(0));
        // Ten cycles later the budget is still one cycle's worth.
        assert_eq!(state.available(10 * SECOND, SECOND, 4), 4);
    }

    #[test]
    fn multi_permit_reservation_spans_cycles() {
        let mut state = CycleState::new(2);
        // Five permits with two per cycle: current budget 2, owes 3 more,
        // which arrive over the next two cycles.
        let wait = state.reserve(0, 5, SECOND, 2, 10 * SECOND).unwrap();
        assert_eq!(wait, 2 * SECOND);
        assert_eq!(state.active_permissions, -3);
    }

    #[test]
    fn refill_grants_initial_permits() {
        let mut state = RefillState::new(2, 0);
        assert_eq!(state.reserve(0, 1, SECOND, 2, 0), Ok(0));
        assert_eq!(state.reserve(0, 1, SECOND, 2, 0), Ok(0));
        assert_eq!(state.reserve(0, 1, SECOND, 2, 0), Err(()));
    }

    #[test]
    fn refill_accrues_linearly() {
        let mut state = RefillState::new(0, 0);
        assert_eq!(state.reserve(0, 1, SECOND, 4, 0), Err(()));
        // Half a second at one permit per second: still nothing.
        assert_eq!(state.reserve(SECOND / 2, 1, SECOND, 4, 0), Err(()));
        assert_eq!(state.reserve(SECOND, 1, SECOND, 4, 0), Ok(0));
    }

    #[test]
    fn refill_caps_at_capacity() {
        let state = RefillState::new(0, 0);
        assert_eq!(state.available(100 * SECOND, SECOND, 3), 3);
    }

    #[test]
    fn refill_reservation_computes_wait() {
        let mut state = RefillState::new(0, 0);
        let wait = state.reserve(0, 2, SECOND, 4, 3 * SECOND).unwrap();
        assert_eq!(wait, 2 * SECOND);
        assert_eq!(state.available_permissions, -2);
    }

    #[test]
    fn refill_keeps_fractional_remainder() {
        let mut state = RefillState::new(0, 0);
        // 1.5 permit-intervals: one permit accrues, half an interval is
        // remembered.
        state.refill(3 * SECOND / 2, SECOND, 10);
        assert_eq!(state.available_permissions, 1);
        state.refill(2 * SECOND, SECOND, 10);
        assert_eq!(state.available_permissions, 2);
    }
}
