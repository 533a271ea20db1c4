//! Retry with exponential backoff and circuit breaking for calls to
//! unreliable dependencies.

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use retry::{RetryExecutor, RetryPolicy};
