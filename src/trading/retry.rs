//! Bounded retries with exponential backoff for connector reads.
//!
//! Only reads go through here. Submissions are never retried: a failed
//! submission is left for the next poll to re-evaluate.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::ConnectorError;

/// How many times, and how patiently, a transient read is retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    pub initial_interval_ms: u64,

    /// Growth factor between retries
    pub multiplier: f64,

    /// Upper bound on a single delay (milliseconds)
    pub max_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 250,
            multiplier: 2.0,
            max_interval_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Policy with no delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval_ms: 0,
            multiplier: 1.0,
            max_interval_ms: 0,
        }
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ConnectorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ConnectorError>>,
    {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_interval_ms))
            .with_multiplier(self.multiplier)
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();

        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        backoff::future::retry_notify(
            backoff,
            || {
                attempt += 1;
                let current = attempt;
                let fut = op();
                async move {
                    match fut.await {
                        Ok(value) => Ok(value),
                        Err(e) if e.is_transient() && current < max_attempts => {
                            Err(backoff::Error::transient(e))
                        }
                        Err(e) => Err(backoff::Error::permanent(e)),
                    }
                }
            },
            |e: ConnectorError, delay: Duration| {
                warn!(
                    op = what,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Transient connector error, retrying"
                );
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_transient_errors_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(3)
            .run("balance", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ConnectorError::Transient("rate limited".into()))
                } else {
                    Ok(42u64)
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<u64, _> = RetryPolicy::immediate(3)
            .run("allowance", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ConnectorError::Transient("timeout".into()))
            })
            .await;

        assert!(matches!(result, Err(ConnectorError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<u64, _> = RetryPolicy::immediate(5)
            .run("quote", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ConnectorError::Fatal("unknown market".into()))
            })
            .await;

        assert_eq!(result, Err(ConnectorError::Fatal("unknown market".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
