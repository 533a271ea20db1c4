use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl DomainError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;

/// Classifies a failure as transient (worth retrying) or permanent.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for DomainError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalService(_) | Self::Timeout(_))
    }
}

/// Failures produced by the retry executor and circuit breaker.
///
/// `E` is the error type of the wrapped operation; it is carried through
/// untouched so callers can still inspect the underlying cause.
#[derive(Error, Debug)]
pub enum ResilienceError<E> {
    #[error("non-retryable failure: {0}")]
    NonRetryable(E),

    #[error("all {attempts} attempts exhausted, last failure: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("circuit breaker is open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("operation cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("{0}")]
    Inner(E),
}

impl<E> ResilienceError<E> {
    /// The underlying operation failure, if one was recorded.
    pub fn source_error(&self) -> Option<&E> {
        match self {
            Self::NonRetryable(e) | Self::Inner(e) => Some(e),
            Self::Exhausted { last, .. } => Some(last),
            Self::CircuitOpen { .. } | Self::Cancelled { .. } => None,
        }
    }

    pub fn into_source_error(self) -> Option<E> {
        match self {
            Self::NonRetryable(e) | Self::Inner(e) => Some(e),
            Self::Exhausted { last, .. } => Some(last),
            Self::CircuitOpen { .. } | Self::Cancelled { .. } => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl<E: Retryable> Retryable for ResilienceError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Inner(e) => e.is_retryable(),
            _ => false,
        }
    }
}
