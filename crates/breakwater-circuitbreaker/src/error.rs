use crate::state::CircuitState;
use thiserror::Error;

/// Refusal raised when the breaker does not permit a call.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{name}' does not permit calls in state {state:?}")]
pub struct CallNotPermittedError {
    /// Name of the refusing breaker.
    pub name: String,
    /// State the breaker was in when it refused.
    pub state: CircuitState,
}

/// Raised by the administrative API for a forbidden state move.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{name}': illegal state transition from {from:?} to {to:?}")]
pub struct IllegalStateTransitionError {
    pub name: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Errors surfaced by the circuit breaker decorators.
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The breaker refused the call; the user operation never ran.
    #[error(transparent)]
    CallNotPermitted(#[from] CallNotPermittedError),

    /// The user operation ran and failed; its error is carried unchanged.
    #[error("inner call error: {0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// True if the breaker refused the call.
    pub fn is_call_not_permitted(&self) -> bool {
        matches!(self, CircuitBreakerError::CallNotPermitted(_))
    }

    /// Returns the user error, if the operation ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Inner(e) => Some(e),
            CircuitBreakerError::CallNotPermitted(_) => None,
        }
    }
}
