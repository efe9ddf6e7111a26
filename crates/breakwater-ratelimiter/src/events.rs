use breakwater_core::PolicyEvent;
use std::time::{Duration, Instant};

/// Events emitted by a rate limiter instance.
#[derive(Debug, Clone)]
pub enum RateLimiterEvent {
    /// Permits were reserved; the caller proceeds after `wait`.
    PermitsAcquired {
        name: String,
        timestamp: Instant,
        permits: u32,
        wait: Duration,
    },
    /// The reservation could not be served within the timeout.
    PermitsRejected {
        name: String,
        timestamp: Instant,
        permits: u32,
    },
}

impl PolicyEvent for RateLimiterEvent {
    fn kind(&self) -> &'static str {
        match self {
            RateLimiterEvent::PermitsAcquired { .. } => "PermitsAcquired",
            RateLimiterEvent::PermitsRejected { .. } => "PermitsRejected",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RateLimiterEvent::PermitsAcquired { timestamp, .. }
            | RateLimiterEvent::PermitsRejected { timestamp, .. } => *timestamp,
        }
    }

    fn source(&self) -> &str {
        match self {
            RateLimiterEvent::PermitsAcquired { name, .. }
            | RateLimiterEvent::PermitsRejected { name, .. } => name,
        }
    }
}
