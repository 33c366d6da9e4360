use std::future::Future;
use std::time::Duration;

use log::{info, warn};
use tokio::time::sleep;

use crate::error::{AppError, ErrorKind, Result};

/// Hard ceiling on retries; the provider quota is too small for more.
pub const MAX_RETRIES: u32 = 2;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Retry decisions for provider calls, keyed off the classified error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.min(MAX_RETRIES),
            base_delay,
        }
    }

    pub fn never() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether a failure of this kind is worth another attempt at all.
    pub fn is_retryable(kind: ErrorKind) -> bool {
        !matches!(kind, ErrorKind::RateLimit | ErrorKind::Unauthorized)
    }

    /// Decide whether to try again after `err`, given how many retries were already spent.
    ///
    /// Only provider errors are retried; cleared queues, missing credentials and invalid
    /// input would fail the same way again.
    pub fn should_retry(&self, err: &AppError, retries_so_far: u32) -> bool {
        if retries_so_far >= self.max_retries {
            return false;
        }
        err.kind().is_some_and(Self::is_retryable)
    }

    /// Back-off before retry number `retry` (1-based), doubling each time.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(retry.saturating_sub(1)))
    }

    /// Run `operation`, retrying failures this policy allows.
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_unless(|| false, operation).await
    }

    /// Like [`RetryPolicy::run`], but no further attempt is made once `cancelled` returns true.
    /// A retry abandoned that way resolves to [`AppError::QueueCleared`].
    pub async fn run_unless<T, F, Fut, C>(&self, cancelled: C, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn() -> bool,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(&err, retries) => {
                    if cancelled() {
                        info!("not retrying after cancellation ({err})");
                        return Err(AppError::QueueCleared);
                    }
                    retries += 1;
                    let delay = self.delay_for(retries);
                    warn!(
                        "attempt {} failed ({err}); retrying in {} ms",
                        retries,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    if cancelled() {
                        return Err(AppError::QueueCleared);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
