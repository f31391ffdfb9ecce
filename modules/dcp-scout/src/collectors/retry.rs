use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use dcp_common::{CollectorConfig, CollectorFailure};

/// Retry schedule for one upstream call: `max_attempts` tries, waiting
/// `base_delay * 2^(n-1)` (capped at `max_delay`) plus up to `jitter` after
/// the n-th failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base,
            max_delay: config.retry_cap,
            jitter: Duration::from_millis(500),
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = Duration::ZERO;
        self
    }

    /// Deterministic part of the wait after `failed_attempts` failures.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }
        let exp = (failed_attempts - 1).min(16);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..max_ms))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// attempts run out. Returns the final outcome and the attempts made.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> (Result<T, CollectorFailure>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CollectorFailure>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if attempt < self.max_attempts && e.is_retryable() => {
                    let wait = self.delay_after(attempt) + self.jitter();
                    warn!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Upstream call failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&CollectorConfig::default()).without_jitter()
    }

    #[test]
    fn delays_double_from_base_and_cap() {
        let p = policy();
        assert_eq!(p.delay_after(0), Duration::ZERO);
        assert_eq!(p.delay_after(1), Duration::from_secs(2));
        assert_eq!(p.delay_after(2), Duration::from_secs(4));
        assert_eq!(p.delay_after(3), Duration::from_secs(8));
        assert_eq!(p.delay_after(4), Duration::from_secs(10));
    }

    #[test]
    fn from_config_never_allows_zero_attempts() {
        let cfg = CollectorConfig {
            max_attempts: 0,
            ..CollectorConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&cfg).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_with_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let (result, attempts) = policy()
            .run("test", |_| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CollectorFailure::Network("reset".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(attempts, 3);
        // 2s after the first failure, 4s after the second.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_secs(7), "waited {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (result, attempts) = policy()
            .run("test", |_| async {
                Err::<(), _>(CollectorFailure::Upstream("502".into()))
            })
            .await;

        assert_eq!(result, Err(CollectorFailure::Upstream("502".into())));
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_errors_are_not_retried() {
        let (result, attempts) = policy()
            .run("test", |_| async {
                Err::<(), _>(CollectorFailure::QuotaExceeded("429".into()))
            })
            .await;

        assert!(matches!(result, Err(CollectorFailure::QuotaExceeded(_))));
        assert_eq!(attempts, 1);
    }
}
