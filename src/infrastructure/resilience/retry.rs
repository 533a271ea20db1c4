use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::{DomainError, ResilienceError, Retryable};

/// Backoff schedule for [`RetryExecutor`].
///
/// Delays run `initial_delay, initial_delay * backoff_factor, ...`,
/// optionally capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            backoff_factor,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(DomainError::validation(format!(
                "backoff_factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn next_delay(&self, current: Duration) -> Duration {
        let nanos = current.as_nanos() as f64 * self.backoff_factor;
        let next = if nanos.is_finite() && nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos.round() as u64)
        } else {
            Duration::from_nanos(u64::MAX)
        };

        match self.max_delay {
            Some(cap) => next.min(cap),
            None => next,
        }
    }

    /// The waits a fully failing call would go through, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let first = match self.max_delay {
            Some(cap) => self.initial_delay.min(cap),
            None => self.initial_delay,
        };
        std::iter::successors(Some(first), move |d| Some(self.next_delay(*d)))
            .take(self.max_retries as usize)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), 2.0)
    }
}

/// Runs a fallible async operation under a [`RetryPolicy`].
///
/// Backoff waits are `tokio::time::sleep`, so only the calling task is
/// suspended. An optional cancellation token is checked before every
/// attempt and interrupts any pending wait.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    cancel: Option<CancellationToken>,
    label: String,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancel: None,
            label: "operation".to_string(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retries failures for which [`Retryable::is_retryable`] is true.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        self.execute_with(operation, |e: &E| e.is_retryable()).await
    }

    /// Retries failures accepted by `is_retryable`.
    pub async fn execute_with<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        is_retryable: P,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts();
        let mut delay = self.policy.delays().next().unwrap_or(self.policy.initial_delay);
        let mut attempt: u32 = 0;

        loop {
            if self.is_cancelled() {
                return Err(ResilienceError::Cancelled { attempts: attempt });
            }
            attempt += 1;

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(label = %self.label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !is_retryable(&error) {
                tracing::warn!(label = %self.label, attempt, error = %error, "non-retryable failure");
                return Err(ResilienceError::NonRetryable(error));
            }

            if attempt >= max_attempts {
                tracing::error!(
                    label = %self.label,
                    attempts = attempt,
                    error = %error,
                    "retries exhausted"
                );
                return Err(ResilienceError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            tracing::warn!(
                label = %self.label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying"
            );

            if self.wait(delay).await {
                return Err(ResilienceError::Cancelled { attempts: attempt });
            }
            delay = self.policy.next_delay(delay);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Returns true when the wait was cut short by cancellation.
    async fn wait(&self, delay: Duration) -> bool {
        match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            },
            None => {
                tokio::time::sleep(delay).await;
                false
            }
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
