use crate::state::CircuitState;
use breakwater_core::PolicyEvent;
use std::time::{Duration, Instant};

/// Events emitted by a circuit breaker instance.
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    /// A successful outcome was recorded.
    SuccessRecorded {
        name: String,
        timestamp: Instant,
        duration: Duration,
        state: CircuitState,
    },
    /// A failed outcome was recorded.
    FailureRecorded {
        name: String,
        timestamp: Instant,
        duration: Duration,
        state: CircuitState,
    },
    /// An error matched the ignore predicate; nothing was recorded.
    IgnoredError { name: String, timestamp: Instant },
    /// The slow-call rate crossed its threshold.
    SlowCallRateExceeded {
        name: String,
        timestamp: Instant,
        slow_call_rate: f32,
    },
    /// The failure rate crossed its threshold.
    FailureRateExceeded {
        name: String,
        timestamp: Instant,
        failure_rate: f32,
    },
    /// A call was refused.
    CallNotPermitted { name: String, timestamp: Instant },
    /// The breaker moved between states.
    StateTransition {
        name: String,
        timestamp: Instant,
        from: CircuitState,
        to: CircuitState,
    },
    /// The breaker was reset to a pristine Closed state.
    Reset { name: String, timestamp: Instant },
}

impl PolicyEvent for CircuitBreakerEvent {
    fn kind(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::SuccessRecorded { .. } => "SuccessRecorded",
            CircuitBreakerEvent::FailureRecorded { .. } => "FailureRecorded",
            CircuitBreakerEvent::IgnoredError { .. } => "IgnoredError",
            CircuitBreakerEvent::SlowCallRateExceeded { .. } => "SlowCallRateExceeded",
            CircuitBreakerEvent::FailureRateExceeded { .. } => "FailureRateExceeded",
            CircuitBreakerEvent::CallNotPermitted { .. } => "CallNotPermitted",
            CircuitBreakerEvent::StateTransition { .. } => "StateTransition",
            CircuitBreakerEvent::Reset { .. } => "Reset",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitBreakerEvent::SuccessRecorded { timestamp, .. }
            | CircuitBreakerEvent::FailureRecorded { timestamp, .. }
            | CircuitBreakerEvent::IgnoredError { timestamp, .. }
            | CircuitBreakerEvent::SlowCallRateExceeded { timestamp, .. }
            | CircuitBreakerEvent::FailureRateExceeded { timestamp, .. }
            | CircuitBreakerEvent::CallNotPermitted { timestamp, .. }
            | CircuitBreakerEvent::StateTransition { timestamp, .. }
            | CircuitBreakerEvent::Reset { timestamp, .. } => *timestamp,
        }
    }

    fn source(&self) -> &str {
        match self {
            CircuitBreakerEvent::SuccessRecorded { name, .. }
            | CircuitBreakerEvent::FailureRecorded { name, .. }
            | CircuitBreakerEvent::IgnoredError { name, .. }
            | CircuitBreakerEvent::SlowCallRateExceeded { name, .. }
            | CircuitBreakerEvent::FailureRateExceeded { name, .. }
            | CircuitBreakerEvent::CallNotPermitted { name, .. }
            | CircuitBreakerEvent::StateTransition { name, .. }
            | CircuitBreakerEvent::Reset { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let now = Instant::now();
        let event = CircuitBreakerEvent::StateTransition {
            name: "cb".to_string(),
            timestamp: now,
            from: CircuitState::Closed,
            to: CircuitState::Open,
        };
        assert_eq!(event.kind(), "StateTransition");
        assert_eq!(event.source(), "cb");
        assert_eq!(event.timestamp(), now);

        let event = CircuitBreakerEvent::CallNotPermitted {
            name: "cb".to_string(),
            timestamp: now,
        };
        assert_eq!(event.kind(), "CallNotPermitted");
    }
}
