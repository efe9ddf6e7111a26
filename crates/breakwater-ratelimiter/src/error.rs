use thiserror::Error;

/// Refusal raised when a permit cannot be granted within the timeout.
#[derive(Debug, Clone, Error)]
#[error("rate limiter '{name}' did not permit the request")]
pub struct RequestNotPermittedError {
    /// Name of the refusing limiter.
    pub name: String,
}

/// Errors surfaced by the rate limiter decorators.
#[derive(Debug, Error)]
pub enum RateLimiterError<E> {
    /// The limiter refused the call; the user operation never ran.
    #[error(transparent)]
    RequestNotPermitted(#[from] RequestNotPermittedError),

    /// The user operation ran and failed; its error is carried unchanged.
    #[error("inner call error: {0}")]
    Inner(E),
}

impl<E> RateLimiterError<E> {
    /// True if the limiter refused the call.
    pub fn is_request_not_permitted(&self) -> bool {
        matches!(self, RateLimiterError::RequestNotPermitted(_))
    }

    /// Returns the user error, if the operation ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RateLimiterError::Inner(e) => Some(e),
            RateLimiterError::RequestNotPermitted(_) => None,
        }
    }
}
