use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Resubmission policy for ledger calls that fail below the ledger layer.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(retry_delay_ms),
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
        }
    }

    /// Run `op`, retrying with exponential backoff while it fails with a
    /// transient error. Any other error is returned on first occurrence.
    pub async fn run<F, Fut, T>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.initial_delay;
        let mut retry_count = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry_count < self.max_retries => {
                    retry_count += 1;
                    warn!(
                        "{} unconfirmed (attempt {}/{}): {}",
                        label,
                        retry_count,
                        self.max_retries + 1,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    if e.is_transient() {
                        error!("{} failed after {} retries: {}", label, retry_count, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            crate::constants::DEFAULT_MAX_TRANSACTION_RETRIES,
            crate::constants::DEFAULT_RETRY_DELAY_MS,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AggregatorError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_unconfirmed_until_success() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, 1);

        let result = policy
            .run("deposit", || {
                let current = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if current < 2 {
                        Err(AggregatorError::TransactionUnconfirmed("dropped".into()))
                    } else {
                        Ok(7u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reverted_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 1);

        let result: Result<()> = policy
            .run("withdraw", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(AggregatorError::TransactionReverted("paused".into())) }
            })
            .await;

        assert!(matches!(result, Err(AggregatorError::TransactionReverted(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, 1);

        let result: Result<()> = policy
            .run("approve", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(AggregatorError::TransactionUnconfirmed("timeout".into())) }
            })
            .await;

        assert!(matches!(result, Err(AggregatorError::TransactionUnconfirmed(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
