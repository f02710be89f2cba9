//! Exponential backoff with jitter for client requests.

use crate::client::error::{ClientError, ClientResult};
use rand::Rng;
use std::{future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// [`backoff`](Self::backoff) plus up to 50% random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let spread = (base.as_millis() / 2) as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::rng().random_range(0..=spread)
        };
        base + Duration::from_millis(jitter)
    }
}

/// Run `action` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is reached. `is_aborted` is checked before every
/// attempt.
pub async fn retry<F, Fut, T, A>(
    policy: &RetryPolicy,
    op: &str,
    is_aborted: A,
    mut action: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
    A: Fn() -> bool,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        if is_aborted() {
            return Err(ClientError::Aborted);
        }
        match action().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt + 1 == attempts || !err.is_retryable() {
                    if err.is_retryable() {
                        error!("{} failed after {} attempts: {}", op, attempt + 1, err);
                    }
                    return Err(err);
                }
                let backoff = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}): {}. retrying in {:?}",
                    op,
                    attempt + 1,
                    err,
                    backoff
                );
                sleep(backoff).await;
            }
        }
    }

    Err(ClientError::Transport(format!("{}: retries exhausted", op)))
}
