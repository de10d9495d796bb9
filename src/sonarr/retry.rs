//! Exponential backoff retry for manager API calls.
//!
//! Only [`SonarrError::Transient`] failures are retried; everything else is
//! returned to the caller immediately. The default budget is three attempts
//! total (initial + two retries) with 1 s, 2 s delays, capped at 8 s. A
//! `Retry-After` supplied by the manager on a 429 overrides the computed
//! delay for that attempt.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::error::SonarrError;

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Cap for exponential growth.
    pub max_delay: Duration,

    /// Multiplier between successive delays.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Default budget: 3 attempts total, 1 s base, 8 s cap.
    pub const DEFAULT: Self = Self {
        max_retries: 2,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(8),
        backoff_multiplier: 2.0,
    };

    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Computes the delay for the given retry attempt (0-indexed), capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }

    /// Iterator over all retry delays.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Executes an async operation, retrying transient failures with backoff.
///
/// `label` names the operation in retry logs. Returns the last error when
/// the retry budget is exhausted.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T, SonarrError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SonarrError>>,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() => {
                attempt += 1;
                if attempt >= max_attempts {
                    warn!(
                        operation = label,
                        attempts = attempt,
                        error = %err,
                        "giving up after exhausting retries"
                    );
                    return Err(err);
                }

                let delay = err
                    .retry_after()
                    .unwrap_or_else(|| config.delay_for_attempt(attempt - 1));
                warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient manager error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig::new(2, Duration::from_millis(1), Duration::from_millis(8), 2.0)
    }

    fn transient(message: &str) -> SonarrError {
        SonarrError::Transient {
            status: Some(503),
            message: message.to_string(),
            retry_after: None,
        }
    }

    // ─── Unit tests ───

    #[test]
    fn default_budget_is_three_attempts() {
        let config = RetryConfig::DEFAULT;
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        let delays: Vec<_> = config.delays().collect();
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn delays_are_capped() {
        let config = RetryConfig::new(6, Duration::from_secs(1), Duration::from_secs(8), 2.0);
        let delays: Vec<_> = config.delays().collect();
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[3], Duration::from_secs(8));
        assert_eq!(delays[5], Duration::from_secs(8));
    }

    #[tokio::test]
    async fn success_on_first_attempt_does_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = retry_with_backoff(fast_config(), "test", move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, SonarrError>(7) }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_succeed_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = retry_with_backoff(fast_config(), "test", move || {
            let n = calls_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient("unavailable"))
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
    async fn exhausted_retries_return_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), _> = retry_with_backoff(fast_config(), "test", move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(transient("still down")) }
        })
        .await;

        assert!(matches!(result, Err(SonarrError::Transient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), _> = retry_with_backoff(fast_config(), "test", move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(SonarrError::Unauthorized) }
        })
        .await;

        assert!(matches!(result, Err(SonarrError::Unauthorized)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_after_overrides_computed_delay() {
        // A 2 ms Retry-After should shortcut the (much larger) computed delay.
        let config = RetryConfig::new(1, Duration::from_secs(30), Duration::from_secs(60), 2.0);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let started = std::time::Instant::now();
        let result = retry_with_backoff(config, "test", move || {
            let n = calls_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(SonarrError::Transient {
                        status: Some(429),
                        message: "rate limited".into(),
                        retry_after: Some(Duration::from_millis(2)),
                    })
                } else {
                    Ok(1)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    // ─── Property tests ───

    proptest! {
        #[test]
        fn delay_never_exceeds_cap(
            initial_ms in 1u64..1000,
            max_ms in 1000u64..60000,
            multiplier in 1.5f64..3.0,
            attempt in 0u32..12,
        ) {
            let config = RetryConfig::new(
                12,
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
                multiplier,
            );
            prop_assert!(config.delay_for_attempt(attempt) <= Duration::from_millis(max_ms));
        }

        #[test]
        fn delay_sequence_is_monotonic(
            initial_ms in 1u64..1000,
            max_ms in 1000u64..60000,
            multiplier in 1.5f64..3.0,
            max_retries in 1u32..12,
        ) {
            let config = RetryConfig::new(
                max_retries,
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
                multiplier,
            );
            let delays: Vec<_> = config.delays().collect();
            for pair in delays.windows(2) {
                prop_assert!(pair[1] >= pair[0]);
            }
        }

        #[test]
        fn first_delay_is_the_initial_delay(
            initial_ms in 1u64..5000,
            max_ms in 5000u64..60000,
            multiplier in 1.0f64..3.0,
        ) {
            let config = RetryConfig::new(
                3,
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
                multiplier,
            );
            prop_assert_eq!(config.delay_for_attempt(0), Duration::from_millis(initial_ms));
        }
    }
}
