//! Retrying activity execution.

use std::future::Future;
use std::time::Duration;

use common::IdempotencyKey;

use crate::activities::ActivityContext;
use crate::error::{ActivityError, ActivityFailure};

/// Number of attempts an activity took.
pub type Attempts = u32;

/// Retry policy applied to every activity invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Factor applied to the delay after each further failure.
    pub multiplier: f64,
    /// Upper bound of any single delay.
    pub max_backoff: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Time limit of a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Sets the total number of attempts (at least one).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Returns the delay after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Runs activities under a [`RetryPolicy`].
///
/// The executor does not deduplicate: every attempt reaches the activity,
/// which is expected to honor the idempotency key in its context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityExecutor;

impl ActivityExecutor {
    /// Creates a new executor.
    pub fn new() -> Self {
        Self
    }

    /// Invokes `op` until it succeeds, fails with a non-retryable error, or
    /// the policy runs out of attempts.
    #[tracing::instrument(skip(self, key, policy, op), fields(key = %key))]
    pub async fn execute<F, Fut>(
        &self,
        step: &str,
        key: &IdempotencyKey,
        policy: &RetryPolicy,
        mut op: F,
    ) -> Result<Attempts, ActivityFailure>
    where
        F: FnMut(ActivityContext) -> Fut,
        Fut: Future<Output = Result<(), ActivityError>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            metrics::counter!("activity_attempts_total", "step" => step.to_string()).increment(1);

            let ctx = ActivityContext::new(key.clone(), attempt);
            let result = match tokio::time::timeout(policy.attempt_timeout, op(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(ActivityError::TimedOut(policy.attempt_timeout)),
            };

            let error = match result {
                Ok(()) => {
                    tracing::debug!(step, attempt, "activity succeeded");
                    return Ok(attempt);
                }
                Err(error) => error,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                metrics::counter!("activity_failures_total", "step" => step.to_string())
                    .increment(1);
                tracing::warn!(step, attempt, error = %error, "activity failed");
                return Err(ActivityFailure {
                    step: step.to_string(),
                    attempts: attempt,
                    error,
                });
            }

            let delay = policy.backoff(attempt);
            tracing::info!(step, attempt, error = %error, ?delay, "activity attempt failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}
