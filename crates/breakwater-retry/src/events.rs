use breakwater_core::PolicyEvent;
use std::time::{Duration, Instant};

/// Events emitted by a retry instance.
#[derive(Debug, Clone)]
pub enum RetryEvent {
    /// A retry is about to run after `delay`.
    Retry {
        name: String,
        timestamp: Instant,
        /// 1-indexed retry number (1 = first retry).
        attempt: usize,
        delay: Duration,
    },
    /// The operation completed successfully after `attempts` invocations.
    Success {
        name: String,
        timestamp: Instant,
        attempts: usize,
    },
    /// The operation failed after exhausting all attempts.
    Error {
        name: String,
        timestamp: Instant,
        attempts: usize,
    },
    /// An error was not retried (ignored or filtered by predicate).
    IgnoredError { name: String, timestamp: Instant },
}

impl PolicyEvent for RetryEvent {
    fn kind(&self) -> &'static str {
        match self {
            RetryEvent::Retry { .. } => "Retry",
            RetryEvent::Success { .. } => "Success",
            RetryEvent::Error { .. } => "Error",
            RetryEvent::IgnoredError { .. } => "IgnoredError",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RetryEvent::Retry { timestamp, .. }
            | RetryEvent::Success { timestamp, .. }
            | RetryEvent::Error { timestamp, .. }
            | RetryEvent::IgnoredError { timestamp, .. } => *timestamp,
        }
    }

    fn source(&self) -> &str {
        match self {
            RetryEvent::Retry { name, .. }
            | RetryEvent::Success { name, .. }
            | RetryEvent::Error { name, .. }
            | RetryEvent::IgnoredError { name, .. } => name,
        }
    }
}
