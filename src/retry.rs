//! Bounded retry with a fixed delay.
//!
//! [`RetryPolicy::run`] calls an async operation until it succeeds, fails
//! with an error the predicate rejects, or runs out of attempts. Exhaustion
//! is not an error: the result is `None`, leaving the caller free to fall
//! back to something else.
//!
//! The wait between attempts goes through a [`Sleeper`] so tests can observe
//! the schedule without sleeping.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::ReferencesConfig;

/// Source of delay between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeper backed by `tokio::time::sleep`.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &ReferencesConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.backoff_ms))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `op` under this policy.
    ///
    /// `op` receives the 1-based attempt number. The delay is constant
    /// between attempts and is not applied after the last one.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        sleeper: &dyn Sleeper,
        is_retryable: P,
        mut op: F,
    ) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        for attempt in 1..=self.max_attempts {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "retry succeeded");
                    }
                    return Some(value);
                }
                Err(e) if !is_retryable(&e) => {
                    warn!(attempt, error = %e, "non-retryable failure, giving up");
                    return None;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "attempt failed"
                    );
                    if attempt < self.max_attempts {
                        sleeper.sleep(self.delay).await;
                    }
                }
            }
        }
        warn!(max_attempts = self.max_attempts, "retries exhausted");
        None
    }
}
