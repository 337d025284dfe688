//! Retrying idempotent firmware and catalog requests
//!
//! Every request this crate makes can be repeated safely: a range read, a
//! length probe or a whole-document GET. [`RetryPolicy::run`] applies the
//! per-attempt deadline, retries transient [`TransportError`]s with doubling
//! backoff, and logs which URL and byte span is being retried.

use rand::{RngExt, rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::error::{Result, TransportError};

/// Part of a remote resource a request reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    /// The whole document
    Whole,
    /// Only the length, via HEAD or a one-byte probe
    Length,
    /// Inclusive byte range
    Bytes { start: u64, end: u64 },
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole => f.write_str("whole"),
            Self::Length => f.write_str("length"),
            Self::Bytes { start, end } => write!(f, "bytes={start}-{end}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Pause before the first retry, doubled for each later one
    pub backoff: Duration,

    /// Upper bound for the doubled pause
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Read `SEPFINDER_MAX_RETRIES` and `SEPFINDER_RETRY_BACKOFF_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str| std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok());

        Self {
            max_retries: var("SEPFINDER_MAX_RETRIES")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.max_retries),
            backoff: var("SEPFINDER_RETRY_BACKOFF_MS")
                .map_or(defaults.backoff, Duration::from_millis),
            ..defaults
        }
    }

    /// Pause before retry number `retry` (1-based), with up to 30% jitter
    fn delay(&self, retry: u32) -> Duration {
        let doubled = self
            .backoff
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
            .min(self.max_backoff);
        doubled.mul_f64(1.0 + rng().random_range(0.0..0.3))
    }

    /// Run `attempt` against `span` of `url`
    ///
    /// Each attempt gets `deadline` before it counts as a
    /// [`TransportError::Timeout`]. Only errors for which
    /// [`TransportError::should_retry`] holds are retried.
    pub async fn run<F, Fut, T>(
        &self,
        url: &Url,
        span: Span,
        deadline: Duration,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0;
        loop {
            let outcome = tokio::time::timeout(deadline, attempt())
                .await
                .unwrap_or(Err(TransportError::Timeout));

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if !e.should_retry() || retry >= self.max_retries => return Err(e),
                Err(e) => {
                    retry += 1;
                    let delay = self.delay(retry);
                    warn!(
                        "{} ({}) failed: {}; retry {}/{} in {:?}",
                        url, span, e, retry, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(
    unsafe_code,
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::significant_drop_tightening
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn ipsw() -> Url {
        Url::parse("https://updates.cdn-apple.com/fw/iPhone14,5_16.5_20F66_Restore.ipsw")
            .expect("url")
    }

    const SPAN: Span = Span::Bytes {
        start: 100,
        end: 199,
    };

    #[test]
    fn test_span_display() {
        assert_eq!(SPAN.to_string(), "bytes=100-199");
        assert_eq!(Span::Length.to_string(), "length");
    }

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
        };
        let within = |retry: u32, base: u64| {
            let delay = policy.delay(retry);
            delay >= Duration::from_millis(base) && delay < Duration::from_millis(base * 13 / 10)
        };
        assert!(within(1, 100));
        assert!(within(2, 200));
        assert!(within(3, 300));
        assert!(within(40, 300));
    }

    #[test]
    fn test_from_env_custom_values() {
        unsafe {
            std::env::set_var("SEPFINDER_MAX_RETRIES", "5");
            std::env::set_var("SEPFINDER_RETRY_BACKOFF_MS", "40");
        }

        let policy = RetryPolicy::from_env();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff, Duration::from_millis(40));
        assert_eq!(policy.max_backoff, RetryPolicy::default().max_backoff);

        for var in ["SEPFINDER_MAX_RETRIES", "SEPFINDER_RETRY_BACKOFF_MS"] {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[tokio::test]
    async fn test_run_retries_timeouts() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = fast_policy(3)
            .run(&ipsw(), SPAN, Duration::from_secs(5), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TransportError::Timeout)
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.expect("third attempt succeeds"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1ms + 2ms of backoff
        assert!(start.elapsed() >= Duration::from_millis(3));
    }

    #[tokio::test]
    async fn test_run_applies_deadline_per_attempt() {
        let calls = AtomicU32::new(0);

        let result = fast_policy(1)
            .run(&ipsw(), SPAN, Duration::from_millis(20), || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok("fast second attempt")
            })
            .await;

        assert_eq!(result.expect("retry after the stalled attempt"), "fast second attempt");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_non_retryable_error() {
        let calls = AtomicU32::new(0);

        let result = fast_policy(3)
            .run(&ipsw(), SPAN, Duration::from_secs(5), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TransportError::InvalidContentRange("bogus".to_string()))
            })
            .await;

        assert!(matches!(result, Err(TransportError::InvalidContentRange(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);

        let result = fast_policy(2)
            .run(&ipsw(), Span::Whole, Duration::from_secs(5), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TransportError::Timeout)
            })
            .await;

        assert!(matches!(result, Err(TransportError::Timeout)));
        // Initial attempt plus two retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_none_policy_single_attempt() {
        let calls = AtomicU32::new(0);
        let _ = RetryPolicy::none()
            .run(&ipsw(), Span::Length, Duration::from_secs(5), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TransportError::Timeout)
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
