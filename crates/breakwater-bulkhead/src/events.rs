use breakwater_core::PolicyEvent;
use std::time::Instant;

/// Events emitted by semaphore and thread-pool bulkheads.
#[derive(Debug, Clone)]
pub enum BulkheadEvent {
    /// A call obtained a permit (or a queue slot, for the pool variant).
    CallPermitted {
        name: String,
        timestamp: Instant,
        /// In-flight calls after this one was admitted.
        concurrent_calls: usize,
    },
    /// A call was refused.
    CallRejected {
        name: String,
        timestamp: Instant,
        max_concurrent_calls: usize,
    },
    /// A permitted call released its permit.
    CallFinished { name: String, timestamp: Instant },
}

impl PolicyEvent for BulkheadEvent {
    fn kind(&self) -> &'static str {
        match self {
            BulkheadEvent::CallPermitted { .. } => "CallPermitted",
            BulkheadEvent::CallRejected { .. } => "CallRejected",
            BulkheadEvent::CallFinished { .. } => "CallFinished",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            BulkheadEvent::CallPermitted { timestamp, .. }
            | BulkheadEvent::CallRejected { timestamp, .. }
            | BulkheadEvent::CallFinished { timestamp, .. } => *timestamp,
        }
    }

    fn source(&self) -> &str {
        match self {
            BulkheadEvent::CallPermitted { name, .. }
            | BulkheadEvent::CallRejected { name, .. }
            | BulkheadEvent::CallFinished { name, .. } => name,
        }
    }
}
