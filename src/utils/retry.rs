use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;

/// Errors that can tell a retry loop whether the provider throttled them.
pub trait RetryClassify {
    fn is_rate_limited(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the random delay added to each backoff.
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(500),
        }
    }
}

/// Delay before retry number `attempt` (0-based): `base * 2^attempt` plus
/// uniform jitter in `[0, max_jitter)`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    let exponential = config.base_delay.saturating_mul(factor);

    let jitter = if config.max_jitter.is_zero() {
        Duration::ZERO
    } else {
        let secs = rand::thread_rng().gen_range(0.0..config.max_jitter.as_secs_f64());
        Duration::from_secs_f64(secs)
    };

    exponential.saturating_add(jitter)
}

/// Runs `operation`, retrying only rate-limited failures with exponential
/// backoff. Any other error is returned immediately. When retries run out,
/// the last rate-limit error is returned.
pub async fn retry_with_exponential_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    E: RetryClassify + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!("Operation succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_rate_limited() && attempt < config.max_retries => {
                let delay = backoff_delay(config, attempt);
                debug!(
                    "Rate limited on attempt {}, retrying in {:?}: {}",
                    attempt + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_rate_limited() {
                    warn!("Still rate limited after {} retries: {}", attempt, e);
                } else {
                    debug!("Attempt {} failed, not retrying: {}", attempt + 1, e);
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Throttled,
        Denied,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Throttled => write!(f, "throttled"),
                TestError::Denied => write!(f, "denied"),
            }
        }
    }

    impl RetryClassify for TestError {
        fn is_rate_limited(&self) -> bool {
            matches!(self, TestError::Throttled)
        }
    }

    #[test]
    fn test_backoff_delay_bounds() {
        let config = RetryConfig::default();
        for attempt in 0..5 {
            for _ in 0..50 {
                let delay = backoff_delay(&config, attempt);
                let floor = Duration::from_secs(2u64.pow(attempt));
                assert!(delay >= floor, "attempt {}: {:?} < {:?}", attempt, delay, floor);
                assert!(delay < floor + Duration::from_millis(500));
            }
        }
    }

    #[test]
    fn test_backoff_without_jitter() {
        let config = RetryConfig {
            max_jitter: Duration::ZERO,
            ..RetryConfig::default()
        };
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_rate_limits_then_success() {
        let config = RetryConfig::default();
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = calls.clone();

        let result = retry_with_exponential_backoff(&config, || {
            let calls = calls_clone.clone();
            async move {
                let mut calls = calls.lock().unwrap();
                calls.push(Instant::now());
                if calls.len() <= 3 {
                    Err(TestError::Throttled)
                } else {
                    Ok("synced")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("synced"));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        for (attempt, pair) in calls.windows(2).enumerate() {
            let waited = pair[1] - pair[0];
            let floor = Duration::from_secs(2u64.pow(attempt as u32));
            assert!(waited >= floor, "retry {} waited {:?}", attempt, waited);
            assert!(waited < floor + Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<(), TestError> =
            retry_with_exponential_backoff(&RetryConfig::default(), || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Denied)
                }
            })
            .await;

        assert_eq!(result, Err(TestError::Denied));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let config = RetryConfig {
            max_retries: 2,
            ..RetryConfig::default()
        };

        let result: Result<(), TestError> = retry_with_exponential_backoff(&config, || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Throttled)
            }
        })
        .await;

        assert_eq!(result, Err(TestError::Throttled));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
