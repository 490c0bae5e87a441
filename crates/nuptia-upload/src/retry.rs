//! Backoff policy shared by negotiation, transfer and confirmation.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use nuptia_core::constants::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RATE_LIMIT_CAP_MS, DEFAULT_RETRY_BASE_DELAY_MS,
};
use nuptia_core::{Classify, FailureClass, RetryState, UploadConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub rate_limit_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            rate_limit_cap: Duration::from_millis(DEFAULT_RATE_LIMIT_CAP_MS),
        }
    }
}

impl From<&UploadConfig> for RetryPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            base_delay: config.retry_base_delay,
            max_attempts: config.max_attempts,
            rate_limit_cap: config.rate_limit_cap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration, class: FailureClass },
    GiveUp { class: FailureClass },
}

/// Terminal outcome of `RetryCoordinator::execute`. The operation's own error is
/// carried as-is so the root cause survives.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryFailure<E: fmt::Display> {
    #[error("gave up after {attempts} attempt(s): {error}")]
    Exhausted { error: E, attempts: u32 },

    #[error("permanent failure on attempt {attempts}: {error}")]
    Permanent { error: E, attempts: u32 },

    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32, last_error: Option<E> },
}

impl<E: fmt::Display> RetryFailure<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryFailure::Exhausted { attempts, .. }
            | RetryFailure::Permanent { attempts, .. }
            | RetryFailure::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryFailure::Cancelled { .. })
    }

    /// The last error the operation produced, if any.
    pub fn into_error(self) -> Option<E> {
        match self {
            RetryFailure::Exhausted { error, .. } | RetryFailure::Permanent { error, .. } => {
                Some(error)
            }
            RetryFailure::Cancelled { last_error, .. } => last_error,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    ///
    /// Ordinary failures back off linearly (`base * attempt`); rate limits back off
    /// exponentially (`base * 2^attempt`) up to the cap.
    pub fn backoff(&self, attempt: u32, class: FailureClass) -> Duration {
        match class {
            FailureClass::RateLimited => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                self.policy
                    .base_delay
                    .checked_mul(factor)
                    .map(|delay| delay.min(self.policy.rate_limit_cap))
                    .unwrap_or(self.policy.rate_limit_cap)
            }
            FailureClass::Transient | FailureClass::Permanent => {
                self.policy.base_delay.saturating_mul(attempt)
            }
        }
    }

    pub fn decide<E: Classify>(&self, attempt: u32, error: &E) -> RetryDecision {
        let class = error.failure_class();
        if class == FailureClass::Permanent || attempt >= self.policy.max_attempts {
            return RetryDecision::GiveUp { class };
        }
        RetryDecision::Retry {
            delay: self.backoff(attempt, class),
            class,
        }
    }

    /// Drive `operation` until it succeeds, fails permanently, runs out of attempts,
    /// or `cancel` fires.
    ///
    /// Cancellation drops the in-flight attempt and prevents any further attempt.
    /// `on_retry` is called once per scheduled retry, before the delay.
    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut on_retry: impl FnMut(&RetryState),
        mut operation: F,
    ) -> Result<T, RetryFailure<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryFailure::Cancelled {
                    attempts: attempt,
                    last_error: None,
                });
            }
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(attempt, "Operation cancelled in flight");
                    return Err(RetryFailure::Cancelled { attempts: attempt, last_error: None });
                }
                outcome = operation(attempt) => outcome,
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match self.decide(attempt, &error) {
                RetryDecision::GiveUp { class } => {
                    debug!(attempt, class = %class, error = %error, "Giving up");
                    return Err(if class == FailureClass::Permanent {
                        RetryFailure::Permanent {
                            error,
                            attempts: attempt,
                        }
                    } else {
                        RetryFailure::Exhausted {
                            error,
                            attempts: attempt,
                        }
                    });
                }
                RetryDecision::Retry { delay, class } => {
                    warn!(
                        attempt,
                        class = %class,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying"
                    );
                    on_retry(&RetryState {
                        attempt,
                        last_error: error.to_string(),
                        next_delay: delay,
                    });

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(RetryFailure::Cancelled {
                                attempts: attempt,
                                last_error: Some(error),
                            });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
