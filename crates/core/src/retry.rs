use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Bounded retry with a fixed delay between attempts; the delay never grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Returned once every attempt has failed; carries the last error seen.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Runs `attempt` until it succeeds or `max_attempts` is reached, sleeping
    /// `delay` before every retry. The closure receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        mut attempt: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts();
        let mut number = 1;

        loop {
            match attempt(number).await {
                Ok(value) => return Ok(value),
                Err(error) if number >= max_attempts => {
                    warn!(operation, attempt = number, %error, "giving up");
                    return Err(RetryExhausted {
                        attempts: number,
                        last_error: error,
                    });
                }
                Err(error) => {
                    warn!(operation, attempt = number, %error, "attempt failed, retrying");
                    tokio::time::sleep(self.delay).await;
                    number += 1;
                }
            }
        }
    }
}
