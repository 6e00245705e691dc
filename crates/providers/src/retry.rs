//! Exponential backoff for transient external failures.

use std::future::Future;
use std::time::Duration;

use ens_domain::error::{Error, Result};

/// Backoff policy: `attempts` tries total, `base_delay` before the
/// second try, multiplied by `multiplier` for each one after.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(700),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries at all; useful in tests and replay.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }
}

/// Run `op`, retrying on transient errors per `policy`. Non-transient
/// errors surface immediately.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.base_delay;
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(attempt, error = %e, "transient failure, backing off");
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(policy.multiplier);
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::Internal("retry loop exited without a result".into()))
}
