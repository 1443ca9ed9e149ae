//! Bounded exponential backoff around stage invocations
//!
//! Every stage call goes through [`RetryPolicy`]. Each attempt is bounded by
//! the stage timeout, and a panic inside a stage is caught here and turned
//! into a non-retryable contract violation.

use futures::FutureExt;
use rand::Rng;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, warn};

use super::stage::{StageContract, StageError};
use crate::config::WorkflowConfig;

/// Result of a stage call together with the number of attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub result: Result<T, StageError>,
    pub attempts: u32,
}

impl<T> Attempted<T> {
    pub fn new(result: Result<T, StageError>, attempts: u32) -> Self {
        Self { result, attempts }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Attempted<U> {
        Attempted {
            result: self.result.map(f),
            attempts: self.attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn retried(&self) -> bool {
        self.attempts > 1
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
    jitter_factor: f64,
    stage_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
            jitter: false,
            jitter_factor: 0.3,
            stage_timeout: None,
        }
    }

    pub fn from_config(config: &WorkflowConfig) -> Self {
        let mut policy = Self::new(config.max_attempts, config.retry_base_delay)
            .with_max_delay(config.max_retry_delay)
            .with_timeout(config.stage_timeout);
        policy.jitter = config.retry_jitter;
        policy
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = true;
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout
    }

    /// Delay before the retry that follows failed attempt `attempt`
    /// (0-indexed): `base_delay * 2^attempt`, capped at the max delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }

        let mut rng = rand::rng();
        let jitter_range = delay.as_secs_f64() * self.jitter_factor;
        let jitter = rng.random_range(-jitter_range / 2.0..=jitter_range / 2.0);
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0)).min(self.max_delay)
    }

    /// Invoke a stage with retries
    pub async fn invoke<S>(&self, stage: &S, input: &S::Input) -> Attempted<S::Output>
    where
        S: StageContract + ?Sized,
    {
        self.invoke_observed(stage, input, |_, _, _| {}).await
    }

    /// Invoke a stage with retries, calling `on_retry` with the failed
    /// attempt number (1-based), the upcoming delay and the failure before
    /// each backoff sleep.
    ///
    /// Non-retryable failures return on first occurrence. Once attempts are
    /// exhausted the last failure is returned unchanged.
    pub async fn invoke_observed<S, F>(
        &self,
        stage: &S,
        input: &S::Input,
        mut on_retry: F,
    ) -> Attempted<S::Output>
    where
        S: StageContract + ?Sized,
        F: FnMut(u32, Duration, &StageError) + Send,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.attempt_once(stage, input).await {
                Ok(output) => return Attempted::new(Ok(output), attempt),
                Err(err) => {
                    if !err.retryable || attempt >= self.max_attempts {
                        debug!(
                            "Giving up after attempt {}/{}: {}",
                            attempt, self.max_attempts, err
                        );
                        return Attempted::new(Err(err), attempt);
                    }

                    let delay = self.apply_jitter(self.delay_for(attempt - 1));
                    warn!(
                        "Retrying stage (attempt {}/{}) after {:?}: {}",
                        attempt, self.max_attempts, delay, err
                    );
                    on_retry(attempt, delay, &err);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt_once<S>(&self, stage: &S, input: &S::Input) -> Result<S::Output, StageError>
    where
        S: StageContract + ?Sized,
    {
        let call = AssertUnwindSafe(stage.execute(input)).catch_unwind();

        let settled = match self.stage_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(settled) => settled,
                Err(_) => {
                    return Err(StageError::timeout(format!(
                        "attempt exceeded {}ms",
                        limit.as_millis()
                    )))
                }
            },
            None => call.await,
        };

        settled.unwrap_or_else(|panic| {
            Err(StageError::contract_violation(format!(
                "stage panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
