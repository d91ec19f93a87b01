//! Bounded retry with exponential backoff for single store calls.

use std::future::Future;
use std::time::Duration;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound of the random delay added to each backoff.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Immediate retries; handy when the store is local.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::none()
        }
    }

    /// Backoff before retry number `retry` (0-based): `base * 2^retry + jitter`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(retry));
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            self.max_jitter.mul_f64(rand::random::<f64>())
        };
        backoff.saturating_add(jitter)
    }
}

/// Outcome of a retried call together with the number of attempts made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, StoreError>,
    pub attempts: u32,
}

/// Runs `op` under a per-call timeout, retrying transient failures per `policy`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    call_timeout: Duration,
    label: &str,
    mut op: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = match tokio::time::timeout(call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(call_timeout)),
        };

        match result {
            Err(err) if err.is_transient() && attempts <= policy.max_retries => {
                let delay = policy.delay_for(attempts - 1);
                tracing::warn!(
                    call = label,
                    attempt = attempts,
                    max_retries = policy.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient store error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            result => return Attempted { result, attempts },
        }
    }
}
