//! The AIMD control loop.
//!
//! Mirrors TCP congestion control: `SlowStart` grows the limit
//! multiplicatively while outcomes stay below the thresholds;
//! `CongestionAvoidance` grows additively and shrinks multiplicatively.
//! The observation window resets on every regime switch, in both
//! directions, so stale outcomes never straddle a regime change.

use crate::config::AdaptiveBulkheadConfig;
use breakwater_core::window::{CountWindow, OutcomeKind, WindowSnapshot};
use std::time::Duration;

/// Regime of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdaptiveState {
    /// Multiplicative increase while the system looks healthy.
    SlowStart,
    /// Additive increase, multiplicative decrease.
    CongestionAvoidance,
}

/// Verdict of one recorded outcome against the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThresholdResult {
    BelowThresholds,
    AboveThresholds,
    /// Not enough samples yet; no adaptation.
    Unreliable,
}

/// What the loop decided after one outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Adjustment {
    pub(crate) new_limit: Option<usize>,
    pub(crate) increased: bool,
    pub(crate) transition: Option<(AdaptiveState, AdaptiveState)>,
}

impl Adjustment {
    const NONE: Adjustment = Adjustment {
        new_limit: None,
        increased: false,
        transition: None,
    };
}

pub(crate) struct Controller {
    state: AdaptiveState,
    window: CountWindow,
    /// The limit is tracked as a float so repeated halving and growing do
    /// not lose resolution to rounding; it is applied rounded.
    limit: f32,
}

impl Controller {
    pub(crate) fn new(config: &AdaptiveBulkheadConfig) -> Self {
        Self {
            state: AdaptiveState::SlowStart,
            window: CountWindow::new(config.sliding_window_size, config.minimum_number_of_calls),
            limit: config.initial_limit as f32,
        }
    }

    pub(crate) fn state(&self) -> AdaptiveState {
        self.state
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit.round() as usize
    }

    pub(crate) fn snapshot(&self) -> WindowSnapshot {
        self.window.snapshot()
    }

    fn judge(&self, config: &AdaptiveBulkheadConfig) -> ThresholdResult {
        let snapshot = self.window.snapshot();
        if snapshot.failure_rate < 0.0 {
            return ThresholdResult::Unreliable;
        }
        if snapshot.failure_rate >= config.failure_rate_threshold
            || snapshot.slow_call_rate >= config.slow_call_rate_threshold
        {
            ThresholdResult::AboveThresholds
        } else {
            ThresholdResult::BelowThresholds
        }
    }

    /// Records one outcome and adapts the limit.
    pub(crate) fn record(
        &mut self,
        config: &AdaptiveBulkheadConfig,
        kind: OutcomeKind,
        duration: Duration,
    ) -> Adjustment {
        let slow = duration >= config.slow_call_duration_threshold;
        self.window.record(kind, duration, slow);

        let verdict = self.judge(config);
        let before = self.limit();
        let mut transition = None;

        match (self.state, verdict) {
            (_, ThresholdResult::Unreliable) => return Adjustment::NONE,
            (AdaptiveState::SlowStart, ThresholdResult::BelowThresholds) => {
                self.limit =
                    (self.limit * config.increase_multiplier).min(config.max_limit as f32);
            }
            (AdaptiveState::SlowStart, ThresholdResult::AboveThresholds) => {
                self.limit =
                    (self.limit * config.decrease_multiplier).max(config.min_limit as f32);
                transition = self.switch_to(AdaptiveState::CongestionAvoidance, config);
            }
            (AdaptiveState::CongestionAvoidance, ThresholdResult::BelowThresholds) => {
                let bottomed = self.limit() <= config.min_limit;
                self.limit = (self.limit + config.increase_summand).min(config.max_limit as f32);
                if bottomed {
                    // The previous decrease hit the floor: probe upward
                    // aggressively again.
                    transition = self.switch_to(AdaptiveState::SlowStart, config);
                }
            }
            (AdaptiveState::CongestionAvoidance, ThresholdResult::AboveThresholds) => {
                self.limit =
                    (self.limit * config.decrease_multiplier).max(config.min_limit as f32);
            }
        }

        let after = self.limit();
        Adjustment {
            new_limit: (after != before).then_some(after),
            increased: after > before,
            transition,
        }
    }

    fn switch_to(
        &mut self,
        to: AdaptiveState,
        _config: &AdaptiveBulkheadConfig,
    ) -> Option<(AdaptiveState, AdaptiveState)> {
        let from = self.state;
        self.state = to;
        // Outcomes observed under the old regime must not drive the new
        // one.
        self.window.reset();
        Some((from, to))
    }
}
