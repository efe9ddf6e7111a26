use thiserror::Error;

/// Refusal raised when no permit could be obtained.
#[derive(Debug, Clone, Error)]
#[error("bulkhead '{name}' is full (limit {max_concurrent_calls})")]
pub struct BulkheadFullError {
    /// Name of the refusing bulkhead.
    pub name: String,
    /// The concurrency limit that was hit.
    pub max_concurrent_calls: usize,
}

/// Raised by a [`crate::TaskHandle`] whose task will never produce a value:
/// the worker panicked or the pool shut down underneath it.
#[derive(Debug, Clone, Error)]
#[error("bulkhead '{name}': task was canceled before completion")]
pub struct TaskCanceledError {
    pub name: String,
}

/// Errors surfaced by the bulkhead decorators.
#[derive(Debug, Error)]
pub enum BulkheadError<E> {
    /// The bulkhead refused the call; the user operation never ran.
    #[error(transparent)]
    Full(#[from] BulkheadFullError),

    /// The user operation ran and failed; its error is carried unchanged.
    #[error("inner call error: {0}")]
    Inner(E),
}

impl<E> BulkheadError<E> {
    /// True if the bulkhead refused the call.
    pub fn is_full(&self) -> bool {
        matches!(self, BulkheadError::Full(_))
    }

    /// Returns the user error, if the operation ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BulkheadError::Inner(e) => Some(e),
            BulkheadError::Full(_) => None,
        }
    }
}
