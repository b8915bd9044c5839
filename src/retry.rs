//! Bounded retry for transient request failures.
//!
//! Uses exponential backoff with jitter between attempts. Failures the
//! server already judged, meaning any response below 500, short-circuit
//! the loop immediately.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::telemetry::TelemetryClient;

/// Retry tuning for the requests of a turn.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, the initial request included.
    #[serde(default = "RetryConfig::default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "RetryConfig::default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Ceiling on the delay between retries in milliseconds.
    #[serde(default = "RetryConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_delay_ms: Self::default_initial_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    fn default_max_attempts() -> u32 {
        5
    }

    fn default_initial_delay_ms() -> u64 {
        1_000
    }

    fn default_max_delay_ms() -> u64 {
        30_000
    }

    /// The default attempt budget with no waiting between attempts.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// Delay = min(initial * 2^attempt, max) * (0.8 + random(0, 0.4))
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay_ms.saturating_mul(1 << attempt.min(10));
        let capped_delay = base_delay.min(self.max_delay_ms);

        // ±20% jitter
        let jitter_factor = 0.8 + (rand::random::<f64>() * 0.4);
        let jittered_delay = (capped_delay as f64 * jitter_factor) as u64;

        Duration::from_millis(jittered_delay)
    }
}

/// Drive `operation` up to `config.max_attempts` times.
///
/// A failure that is not [`retryable`](crate::error::EngineError::is_retryable)
/// propagates at once. The failure that finally escapes, exhausted or
/// short-circuited, is reported to `telemetry` when configured.
pub(crate) async fn with_retries<T, F, Fut>(
    config: &RetryConfig,
    telemetry: Option<&dyn TelemetryClient>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;
                if !error.is_retryable() || attempt >= config.max_attempts {
                    if let Some(telemetry) = telemetry {
                        let retry_count = config.max_attempts.to_string();
                        telemetry.track_exception(
                            &error,
                            &[
                                ("handledAt", "withRetries"),
                                ("retryCount", retry_count.as_str()),
                            ],
                        );
                    }
                    return Err(error);
                }
                tracing::debug!(attempt, error = %error, "transient request failure, backing off");
                tokio::time::sleep(config.delay_for_attempt(attempt - 1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::EngineError;

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_retries(&RetryConfig::immediate(), None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries(&RetryConfig::immediate(), None, || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(EngineError::Status { status: 503 })
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_the_attempt_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(&RetryConfig::immediate(), None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Status { status: 500 }) }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            EngineError::Status { status: 500 }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn client_errors_short_circuit() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(&RetryConfig::immediate(), None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Status { status: 404 }) }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            EngineError::Status { status: 404 }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct RecordingTelemetry {
        exceptions: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl TelemetryClient for RecordingTelemetry {
        fn track_exception(&self, error: &EngineError, tags: &[(&str, &str)]) {
            self.exceptions.lock().unwrap().push((
                error.to_string(),
                tags.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ));
        }
    }

    #[tokio::test]
    async fn escaping_failure_is_reported_with_tags() {
        let telemetry = RecordingTelemetry {
            exceptions: Mutex::new(Vec::new()),
        };
        let result: Result<()> = with_retries(&RetryConfig::immediate(), Some(&telemetry), || {
            async { Err(EngineError::Status { status: 500 }) }
        })
        .await;
        assert!(result.is_err());

        let exceptions = telemetry.exceptions.lock().unwrap();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].0, "server returned 500");
        assert_eq!(
            exceptions[0].1,
            vec![
                ("handledAt".to_string(), "withRetries".to_string()),
                ("retryCount".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn delay_grows_exponentially_within_jitter_bounds() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
        };

        for (attempt, expected) in [(0, 100u64), (1, 200), (2, 400), (3, 800)] {
            let delay = config.delay_for_attempt(attempt).as_millis() as u64;
            let lower = expected * 8 / 10;
            let upper = expected * 12 / 10;
            assert!(
                delay >= lower && delay <= upper,
                "attempt {attempt}: {delay}ms outside [{lower}, {upper}]"
            );
        }
    }

    #[test]
    fn delay_is_capped() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 2_000,
        };

        let delay = config.delay_for_attempt(9).as_millis() as u64;
        assert!(delay <= 2_400);
    }

    #[test]
    fn zero_delay_configuration_never_sleeps() {
        let config = RetryConfig::immediate();
        for attempt in 0..6 {
            assert_eq!(config.delay_for_attempt(attempt), Duration::ZERO);
        }
    }
}
