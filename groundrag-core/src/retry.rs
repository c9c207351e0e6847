//! Transport-level retry with exponential backoff.
//!
//! This is independent of the pipeline's regeneration and refinement budgets:
//! it only re-issues the *same* call after a transient failure such as a
//! dropped connection or a rate limit.

use crate::config::RetryConfig;
use crate::error::{LlmError, RetrievalError};
use std::future::Future;
use std::time::Duration;

/// Errors that can tell whether re-issuing the same call may succeed.
pub trait Transient: std::fmt::Display {
    fn is_transient(&self) -> bool;

    /// Server-requested minimum wait, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        self.is_retryable()
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

impl Transient for RetrievalError {
    fn is_transient(&self) -> bool {
        self.is_retryable()
    }
}

/// Execute an async operation, retrying transient errors with exponential backoff.
///
/// Permanent errors return immediately. Rate-limit errors wait at least as long
/// as the server asked for.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !e.is_transient() || attempt >= config.max_retries {
                    return Err(e);
                }

                let backoff = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff<E: Transient>(config: &RetryConfig, attempt: u32, err: &E) -> Duration {
    let computed = Duration::from_millis(compute_exponential_backoff(config, attempt));
    match err.retry_after() {
        Some(server) => server.max(computed),
        None => computed,
    }
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% extra
        let jitter = (capped as f64 * 0.25 * jitter_fraction()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Cheap pseudo-random fraction in [0, 1) from the clock's sub-second nanos.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
