use anyhow::Result;
use log::{debug, info, warn};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Feed downloads are cheap to repeat but the pass should not stall for long.
    pub fn feed_fetch() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let scaled = delay.as_secs_f64() * self.backoff_multiplier;
        Duration::from_secs_f64(scaled).min(self.max_delay)
    }
}

pub async fn retry_with_exponential_backoff<T, F, Fut>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>> + Send + 'static,
{
    let attempts = config.max_attempts.max(1);
    let mut delay = config.base_delay;
    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("Operation succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !is_transient_error(&error) {
            debug!("Attempt {} failed with non-transient error, not retrying: {}", attempt, error);
            return Err(error);
        }
        if attempt >= attempts {
            warn!("Operation failed after {} attempts: {}", attempts, error);
            return Err(error.context(format!("failed after {} attempts", attempts)));
        }

        debug!("Attempt {} failed transiently, retrying in {:?}: {}", attempt, delay, error);
        tokio::time::sleep(delay).await;
        delay = config.next_delay(delay);
        attempt += 1;
    }
}

/// Whether repeating the request could plausibly succeed.
pub fn is_transient_error(error: &anyhow::Error) -> bool {
    if let Some(http) = error.downcast_ref::<reqwest::Error>() {
        if http.is_timeout() || http.is_connect() {
            return true;
        }
        if let Some(status) = http.status() {
            return status.is_server_error() || status.as_u16() == 429;
        }
    }

    let error_str = error.to_string().to_lowercase();
    [
        "timeout",
        "timed out",
        "connection",
        "network",
        "temporary",
        "rate limit",
        "too many requests",
        "service unavailable",
        "internal server error",
        "bad gateway",
        "gateway timeout",
        "http 429",
        "http 500",
        "http 502",
        "http 503",
        "http 504",
    ]
    .iter()
    .any(|needle| error_str.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retry_success_on_second_attempt() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result = retry_with_exponential_backoff(&quick(), || {
            let count_clone = attempt_count_clone.clone();
            async move {
                let count = count_clone.fetch_add(1, Ordering::SeqCst);
                if count == 0 {
                    Err(anyhow::anyhow!("Temporary failure"))
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_non_transient_error() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result: Result<&str> = retry_with_exponential_backoff(&quick(), || {
            let count_clone = attempt_count_clone.clone();
            async move {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("Feed returned HTML instead of iCalendar data"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result: Result<&str> = retry_with_exponential_backoff(&quick(), || {
            let count_clone = attempt_count_clone.clone();
            async move {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("HTTP 503 Service Unavailable"))
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
        assert!(format!("{:#}", err).contains("failed after 3 attempts"));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = quick();
        assert_eq!(config.next_delay(Duration::from_millis(1)), Duration::from_millis(2));
        assert_eq!(config.next_delay(Duration::from_millis(3)), Duration::from_millis(4));
    }
}
