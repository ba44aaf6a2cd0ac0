//! Bounded retry for transient gateway failures.
//!
//! Only [`GatewayError::Network`] is retried; auth failures, rejections and
//! unknown ids fail identically on replay and surface immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use engine::gateway::GatewayError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// Run `call` until it succeeds, fails non-transiently, or the attempt
/// budget is spent. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut call: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut delay = policy.initial_backoff;
    let mut attempt = 1u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                warn!(%err, attempt, "{} failed, retrying in {:?}", label, delay);
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn network_errors_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(fast(), "fetch", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GatewayError::Network("timeout".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_errors_fail_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(fast(), "fetch", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Auth("bad key".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(GatewayError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(fast(), "fetch", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Network("still down".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(GatewayError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
