use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{Clock, ResilienceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
}

/// Failure-threshold circuit breaker.
///
/// Closed until `failure_threshold` consecutive failures, then Open:
/// calls are rejected without running until `timeout` has passed since the
/// last failure. The next call after that runs in HalfOpen; any failure
/// there reopens the circuit, `success_threshold` successes close it.
///
/// Callers that must not hold a lock across an await can drive the
/// breaker with [`try_acquire`](Self::try_acquire) and the `record_*`
/// methods instead of [`call`](Self::call).
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            clock,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            name: self.name.clone(),
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_time: self.last_failure_time,
        }
    }

    /// Admits or rejects one call. An Open circuit whose timeout has
    /// elapsed moves to HalfOpen here and admits the call.
    pub fn try_acquire<E>(&mut self) -> Result<(), ResilienceError<E>> {
        if self.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = self.since_last_failure();
        if elapsed >= self.config.timeout {
            self.success_count = 0;
            self.transition(CircuitState::HalfOpen);
            return Ok(());
        }

        Err(ResilienceError::CircuitOpen {
            retry_in: self.config.timeout - elapsed,
        })
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.failure_count = 0;
                    self.transition(CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        self.last_failure_time = Some(self.clock.now());

        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.failure_count += 1;
                self.transition(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Runs `operation` through the breaker. Failures of the operation are
    /// returned as [`ResilienceError::Inner`].
    pub async fn call<T, E, F, Fut>(&mut self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire::<E>()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(ResilienceError::Inner(e))
            }
        }
    }

    fn since_last_failure(&self) -> Duration {
        match self.last_failure_time {
            Some(at) => (self.clock.now() - at).to_std().unwrap_or(Duration::ZERO),
            None => self.config.timeout,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        let from = self.state;
        self.state = to;
        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                ?from,
                failures = self.failure_count,
                "circuit opened"
            ),
            _ => tracing::info!(breaker = %self.name, ?from, ?to, "circuit state changed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DomainError, ManualClock};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(clock: &ManualClock) -> CircuitBreaker {
        CircuitBreaker::new(
            "llm",
            CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                timeout: Duration::from_secs(30),
            },
            Arc::new(clock.clone()),
        )
    }

    async fn fail(b: &mut CircuitBreaker) -> Result<(), ResilienceError<DomainError>> {
        b.call(|| async { Err::<(), _>(DomainError::external("boom")) }).await
    }

    async fn succeed(b: &mut CircuitBreaker) -> Result<(), ResilienceError<DomainError>> {
        b.call(|| async { Ok::<(), DomainError>(()) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects_without_running() {
        let clock = ManualClock::default();
        let mut b = breaker(&clock);

        for _ in 0..3 {
            assert!(matches!(fail(&mut b).await, Err(ResilienceError::Inner(_))));
        }
        assert_eq!(b.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result: Result<(), ResilienceError<DomainError>> = b
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let clock = ManualClock::default();
        let mut b = breaker(&clock);

        fail(&mut b).await.unwrap_err();
        fail(&mut b).await.unwrap_err();
        succeed(&mut b).await.unwrap();
        fail(&mut b).await.unwrap_err();

        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_then_closes() {
        let clock = ManualClock::default();
        let mut b = breaker(&clock);
        for _ in 0..3 {
            fail(&mut b).await.unwrap_err();
        }

        clock.advance(Duration::from_secs(29));
        match succeed(&mut b).await {
            Err(ResilienceError::CircuitOpen { retry_in }) => {
                assert_eq!(retry_in, Duration::from_secs(1))
            }
            other => panic!("expected open circuit, got {other:?}"),
        }

        clock.advance(Duration::from_secs(1));
        succeed(&mut b).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);

        succeed(&mut b).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_without_partial_credit() {
        let clock = ManualClock::default();
        let mut b = breaker(&clock);
        for _ in 0..3 {
            fail(&mut b).await.unwrap_err();
        }

        clock.advance(Duration::from_secs(30));
        succeed(&mut b).await.unwrap();
        assert_eq!(b.snapshot().success_count, 1);

        fail(&mut b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.snapshot().last_failure_time, Some(clock.now()));

        // The timeout restarts from the half-open failure.
        clock.advance(Duration::from_secs(10));
        assert!(matches!(
            succeed(&mut b).await,
            Err(ResilienceError::CircuitOpen { .. })
        ));

        clock.advance(Duration::from_secs(20));
        succeed(&mut b).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_eq!(b.snapshot().success_count, 1);
    }

    #[test]
    fn test_manual_acquire_and_record() {
        let clock = ManualClock::default();
        let mut b = breaker(&clock);

        for _ in 0..3 {
            b.try_acquire::<DomainError>().unwrap();
            b.record_failure();
        }

        assert!(b.try_acquire::<DomainError>().is_err());
        let snapshot = b.snapshot();
        assert_eq!(snapshot.name, "llm");
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 3);
    }
}
