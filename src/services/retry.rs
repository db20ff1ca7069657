use std::future::Future;
use std::time::Duration;

use crate::error::AppResult;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_DELAY: Duration = Duration::from_millis(10_000);

/// Bounded retry with a fixed delay between attempts
///
/// The delay never grows and carries no jitter. Errors that are not transient
/// (see [`crate::error::AppError::is_transient`]) are returned on the first
/// attempt without retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Runs `operation` until it succeeds, fails permanently, or attempts run out
    ///
    /// The error of the final attempt is returned as is.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(label = %label, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => {
                    tracing::warn!(label = %label, attempt, error = %e, "Non-retryable failure");
                    return Err(e);
                }
                Err(e) if attempt >= attempts => {
                    tracing::error!(label = %label, attempts, error = %e, "Operation failed after all attempts");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        label = %label,
                        attempt,
                        attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Like [`RetryPolicy::run`], but logs and swallows the final error
    pub async fn run_or_none<T, F, Fut>(&self, label: &str, operation: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        match self.run(label, operation).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(label = %label, error = %e, "Best-effort operation gave up");
                None
            }
        }
    }
}
