//! Bounded exponential backoff for upstream calls.
//!
//! Delay before retry `n` (0-based) is `base * 2^n`, capped at `cap`. Only
//! errors with [`PipelineError::is_transient`] are retried; anything else
//! is returned immediately. Running out of attempts yields
//! [`PipelineError::FetchFailed`].

use std::future::Future;
use std::time::Duration;

use crate::config::FetchingConfig;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchingConfig) -> Self {
        Self {
            max_attempts: config.retry_limit,
            base: config.backoff_base(),
            cap: config.backoff_cap(),
        }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base.saturating_mul(1 << retry.min(20)).min(self.cap)
    }

    pub async fn run<T, F, Fut>(&self, slug: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };

            if attempt >= self.max_attempts {
                tracing::error!(slug, attempts = attempt, error = %err, "giving up");
                return Err(PipelineError::FetchFailed {
                    slug: slug.to_string(),
                    attempts: attempt,
                    last: err.to_string(),
                });
            }

            let delay = self.delay_for(attempt - 1);
            tracing::warn!(slug, attempt, ?delay, error = %err, "retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(4),
        }
    }

    fn transient() -> PipelineError {
        PipelineError::TransientFetch {
            slug: "qualys".into(),
            reason: "connection reset".into(),
        }
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let policy = RetryPolicy::default();
        let secs: Vec<u64> = (0..6).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let value = fast(3)
            .run("qualys", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausting_attempts_is_fetch_failed() {
        let calls = AtomicU32::new(0);
        let err = fast(3)
            .run("qualys", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            PipelineError::FetchFailed { slug, attempts, .. } => {
                assert_eq!(slug, "qualys");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast(5)
            .run("qualys", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(PipelineError::UpstreamContract {
                    slug: "qualys".into(),
                    reason: "not json".into(),
                })
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, PipelineError::UpstreamContract { .. }));
    }
}
