use thiserror::Error;

/// Raised when the attempt budget was exhausted by a retryable result and
/// the configuration asks for failure rather than returning that result.
#[derive(Debug, Clone, Error)]
#[error("retry '{name}': max attempts exhausted after {attempts} invocations")]
pub struct MaxRetriesExceededError {
    pub name: String,
    pub attempts: usize,
}

/// Errors surfaced by the retry decorators.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The attempt budget ran out on a retryable result.
    #[error(transparent)]
    MaxRetriesExceeded(#[from] MaxRetriesExceededError),

    /// The operation's own error, carried unchanged: either it was not
    /// retryable, or it was the last of an exhausted budget.
    #[error("inner call error: {0}")]
    Inner(E),
}

impl<E> RetryError<E> {
    /// Returns the user error, if one was surfaced.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Inner(e) => Some(e),
            RetryError::MaxRetriesExceeded(_) => None,
        }
    }
}
