//! Bounded-attempt retry with jittered exponential backoff.
//!
//! Wraps any upstream call in at most `max_attempts` attempts. Between
//! attempts it sleeps `min(initial_delay * 2^(attempt-1), max_delay)` plus
//! up to 10% jitter. Retriability is decided by [`CallError::is_retriable`];
//! a non-retriable error aborts immediately with the last error.

use log::{info, warn};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::error::CallError;

/// Retry tuning, from the environment.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff base.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff (for testing).
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
        }
    }

    /// Fast backoff (for testing).
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        }
    }
}

/// What the retry wrapper observed.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final result: the first success or the last error.
    pub result: Result<T, CallError>,
    /// Attempts actually spent.
    pub attempts: u32,
    /// Wall-clock time across all attempts and backoffs.
    pub total_duration: Duration,
}

impl<T> RetryOutcome<T> {
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run `f` with retries per `config`.
///
/// `label` names the operation in log lines.
pub async fn run_with_retry<T, F, Fut>(config: &RetryConfig, label: &str, mut f: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let started = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{label}: succeeded on attempt {attempt}/{max_attempts}");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    total_duration: started.elapsed(),
                };
            }
            Err(error) => {
                if !error.is_retriable() {
                    warn!("{label}: not retriable, giving up: {error}");
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt,
                        total_duration: started.elapsed(),
                    };
                }
                if attempt >= max_attempts {
                    warn!("{label}: failed after {attempt} attempt(s): {error}");
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt,
                        total_duration: started.elapsed(),
                    };
                }

                let delay = backoff_delay(config, attempt);
                warn!(
                    "{label}: attempt {attempt}/{max_attempts} failed ({error}), retrying in {}ms",
                    delay.as_millis()
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Exponential backoff with up to 10% jitter.
///
/// Doubling via a saturating shift; jitter is derived from the subsecond
/// clock to avoid thundering herds without pulling in a RNG.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let max_delay_ms = u64::try_from(config.max_delay.as_millis()).unwrap_or(u64::MAX);
    let initial_ms = u64::try_from(config.initial_delay.as_millis()).unwrap_or(u64::MAX);

    let shift = attempt.saturating_sub(1).min(63);
    let base = initial_ms.saturating_mul(1u64 << shift).min(max_delay_ms);

    let max_jitter = base / 10;
    let jitter = if max_jitter > 0 {
        u64::from(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos(),
        ) % max_jitter
    } else {
        0
    };

    Duration::from_millis(base.saturating_add(jitter))
}
