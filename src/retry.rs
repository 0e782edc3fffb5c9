//! Bounded retry with exponential backoff
//!
//! Used for upstream reconnection and the music request side channel. A policy
//! always terminates: after `max_attempts` tries the last error is returned.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Backoff factor applied after each failed attempt
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

impl RetryPolicy {
    /// Exponential backoff starting at 100ms, doubling, capped at 30s
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Same delay before every attempt
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// A single immediate attempt
    pub fn once() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Upstream reconnect chain: 500ms, then x1.4, three attempts
    pub fn reconnect() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 1.4,
        }
    }

    /// Music side channel: three immediate attempts
    pub fn music_request() -> Self {
        Self::fixed(3, Duration::ZERO)
    }

    /// Delay before the given 1-based attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay_ms =
            (self.initial_delay.as_millis() as f64) * self.multiplier.powi((attempt - 1) as i32);
        Duration::from_millis(delay_ms.round() as u64).min(self.max_delay)
    }

    /// Whether another attempt may follow the given number of completed attempts
    pub fn allows(&self, completed: u32) -> bool {
        completed < self.max_attempts
    }

    /// Run `op` until it succeeds or attempts are exhausted.
    ///
    /// `op` receives the 1-based attempt number. The delay for each attempt is
    /// slept before calling it.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> std::result::Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if self.allows(attempt) => {
                    tracing::debug!(attempt, error = %err, "attempt failed, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
