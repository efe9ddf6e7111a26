use crate::AdaptiveState;
use breakwater_core::PolicyEvent;
use std::time::Instant;

/// Events emitted by an adaptive bulkhead's control loop.
#[derive(Debug, Clone)]
pub enum AdaptiveBulkheadEvent {
    /// The concurrency limit was raised.
    LimitIncreased {
        name: String,
        timestamp: Instant,
        new_limit: usize,
    },
    /// The concurrency limit was lowered.
    LimitDecreased {
        name: String,
        timestamp: Instant,
        new_limit: usize,
    },
    /// The control loop switched regimes.
    StateTransition {
        name: String,
        timestamp: Instant,
        from: AdaptiveState,
        to: AdaptiveState,
    },
}

impl PolicyEvent for AdaptiveBulkheadEvent {
    fn kind(&self) -> &'static str {
        match self {
            AdaptiveBulkheadEvent::LimitIncreased { .. } => "LimitIncreased",
            AdaptiveBulkheadEvent::LimitDecreased { .. } => "LimitDecreased",
            AdaptiveBulkheadEvent::StateTransition { .. } => "StateTransition",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            AdaptiveBulkheadEvent::LimitIncreased { timestamp, .. }
            | AdaptiveBulkheadEvent::LimitDecreased { timestamp, .. }
            | AdaptiveBulkheadEvent::StateTransition { timestamp, .. } => *timestamp,
        }
    }

    fn source(&self) -> &str {
        match self {
            AdaptiveBulkheadEvent::LimitIncreased { name, .. }
            | AdaptiveBulkheadEvent::LimitDecreased { name, .. }
            | AdaptiveBulkheadEvent::StateTransition { name, .. } => name,
        }
    }
}
