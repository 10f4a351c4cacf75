//! Bounded, cancellable retry.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The last error, after `attempts` calls or a non-retryable failure
    Failed {
        /// The error returned by the last call
        error: E,
        /// Calls made
        attempts: u32,
    },
    /// Cancelled before the next attempt
    Cancelled,
}

/// Fixed attempt ceiling with a fixed sleep between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// At most `attempts` calls in total; zero behaves as one.
    #[must_use]
    pub const fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: if attempts == 0 { 1 } else { attempts },
            backoff,
        }
    }

    /// Total calls allowed
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Sleep between calls
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Call `f` until it succeeds, fails with an error `is_retryable` rejects,
    /// runs out of attempts, or `cancel` fires during a backoff.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        is_retryable: P,
        mut f: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            let error = match f().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !is_retryable(&error) || attempt >= self.attempts {
                return Err(RetryError::Failed {
                    error,
                    attempts: attempt,
                });
            }

            warn!(
                operation,
                attempt,
                max_attempts = self.attempts,
                backoff_ms = self.backoff.as_millis() as u64,
                error = %error,
                "Retrying after failure"
            );
            if !sleep_or_cancel(cancel, self.backoff).await {
                return Err(RetryError::Cancelled);
            }
            attempt += 1;
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first. Returns whether the full
/// sleep elapsed.
pub async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
