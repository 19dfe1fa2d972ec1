//! Jittered exponential backoff (§4.6), deadline-aware.

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tdtp_core::error::{Result, TdtpError};

const SUBSYSTEM: &str = "retry";

pub type RetryPredicate = std::sync::Arc<dyn Fn(&TdtpError) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RetryConfig {
    /// Inclusive of the first attempt.
    pub max_attempts: u32,
    pub delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Classifies whether an error should be retried. Defaults to
    /// `TdtpError::is_retryable_default` (transient-only) when absent.
    pub retryable: Option<RetryPredicate>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            retryable: None,
        }
    }
}

/// `delay_i = min(MaxDelay, Delay * Multiplier^(i-1)) +/- jitter in [0, delay_i/2)`,
/// for the i-th retry (i.e. attempt index 1 computes the delay before attempt 2).
fn backoff_delay(config: &RetryConfig, attempt_index: u32) -> Duration {
    let exp = config.multiplier.powi(attempt_index as i32 - 1);
    let base = (config.delay.as_secs_f64() * exp).min(config.max_delay.as_secs_f64());
    let jitter = rand::thread_rng().gen_range(0.0..(base / 2.0).max(0.0));
    Duration::from_secs_f64(base + jitter)
}

fn is_retryable(config: &RetryConfig, err: &TdtpError) -> bool {
    match &config.retryable {
        Some(predicate) => predicate(err),
        None => err.is_retryable_default(),
    }
}

/// Calls `f` repeatedly until it succeeds, a non-retryable error is hit,
/// `max_attempts` is exhausted, or `deadline` would be exceeded by the next
/// wait (in which case retry stops immediately without waiting).
pub async fn retry<F, Fut, T>(config: &RetryConfig, deadline: Option<Instant>, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(config, &err) {
                    return Err(err);
                }
                if attempt >= config.max_attempts {
                    return Err(err);
                }

                let delay = backoff_delay(config, attempt);
                if let Some(deadline) = deadline {
                    if Instant::now() + delay > deadline {
                        return Err(TdtpError::transient(
                            SUBSYSTEM,
                            format!("retry deadline exceeded after attempt {attempt}: {err}"),
                        ));
                    }
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_transient_errors_up_to_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_attempts: 3,
            delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            retryable: None,
        };
        let calls_clone = calls.clone();
        let result: Result<()> = retry(&config, None, || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TdtpError::transient("test", "always fails"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_abort_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::default();
        let calls_clone = calls.clone();
        let result: Result<()> = retry(&config, None, || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TdtpError::permission("test", "not retryable"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_on_second_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_attempts: 5,
            delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            retryable: None,
        };
        let calls_clone = calls.clone();
        let result = retry(&config, None, || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(TdtpError::transient("test", "first call fails"))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
