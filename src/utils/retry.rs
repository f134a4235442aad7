// src/utils/retry.rs
//! Bounded exponential backoff for transient failures.
//!
//! Network calls to the storage gateway, the ledger RPC, and the record store
//! are retried only when the classified error says so; signer rejections and
//! integrity mismatches pass through on the first failure.

use log::warn;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::errors::IssuanceError;

/// Retry policy: attempt count and base delay for the exponential schedule.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based), doubled per attempt with up to
    /// 25% random jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1 << (attempt - 1).min(10));
        let jitter = rand::thread_rng().gen_range(0..=exp.as_millis() as u64 / 4);
        exp + Duration::from_millis(jitter)
    }
}

/// Runs `op`, retrying on errors whose [`IssuanceError::is_retryable`] is
/// true, up to `policy.max_attempts` total attempts.
pub async fn with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, IssuanceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IssuanceError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    label, attempt, policy.max_attempts, delay, err
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
