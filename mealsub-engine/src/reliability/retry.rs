//! Exponential backoff retry logic for transient failures.
//!
//! Used for store writes after a payment has been captured, where giving up
//! early turns a blip into a manual reconciliation.

use std::time::Duration;

use crate::EngineError;

/// Configuration for retry behavior.
///
/// The delay between retries increases exponentially up to a maximum value.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use mealsub_engine::reliability::RetryPolicy;
///
/// // Default policy: 3 attempts, 100ms initial delay, 5s max delay
/// let policy = RetryPolicy::default();
///
/// let aggressive = RetryPolicy {
///     max_attempts: 5,
///     initial_delay: Duration::from_millis(50),
///     max_delay: Duration::from_secs(10),
///     backoff_multiplier: 2.0,
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (default: 3)
    pub max_attempts: u32,
    /// Initial delay between retries (default: 100ms)
    pub initial_delay: Duration,
    /// Maximum delay between retries (default: 5s)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy with custom maximum attempts.
    ///
    /// # Examples
    ///
    /// ```
    /// use mealsub_engine::reliability::RetryPolicy;
    ///
    /// let policy = RetryPolicy::with_max_attempts(5);
    /// assert_eq!(policy.max_attempts, 5);
    /// ```
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    /// Calculates delay for a specific attempt.
    ///
    /// Uses exponential backoff: delay = `initial_delay` * (multiplier ^ attempt),
    /// capped at `max_delay`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss, reason = "acceptable for duration calculations")]
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis();
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_precision_loss,
            clippy::cast_sign_loss,
            reason = "delay_ms is positive and clamped to max_delay before the cast"
        )]
        let delay = if !delay_ms.is_finite() || delay_ms >= max_ms as f64 {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        };
        delay.min(self.max_delay)
    }
}

/// Executes operation with exponential backoff retry.
///
/// Retries the operation up to `max_attempts` times while `should_retry`
/// accepts the error. A rejected error is returned immediately.
///
/// # Examples
///
/// ```
/// use std::sync::{
///     Arc,
///     atomic::{AtomicU32, Ordering},
/// };
///
/// use mealsub_engine::reliability::{RetryPolicy, retry_with_backoff};
///
/// # async fn example() -> Result<String, String> {
/// let policy = RetryPolicy::default();
/// let attempt = Arc::new(AtomicU32::new(0));
///
/// let result = retry_with_backoff(&policy, |_| true, || {
///     let attempt = Arc::clone(&attempt);
///     async move {
///         let n = attempt.fetch_add(1, Ordering::Relaxed);
///         if n < 2 {
///             Err("temporary failure".to_string())
///         } else {
///             Ok("success".to_string())
///         }
///     }
/// })
/// .await?;
///
/// assert_eq!(result, "success");
/// # Ok(result)
/// # }
/// ```
///
/// # Errors
///
/// Returns the last error encountered if all attempts fail, or the first
/// error `should_retry` rejects. A policy with `max_attempts == 0` still
/// runs the operation once.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                let retryable = should_retry(&error);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    retryable,
                    error = %error,
                    "Operation failed"
                );

                // Don't sleep after the last attempt
                if !retryable || attempt + 1 >= max_attempts {
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(delay_ms = delay.as_millis(), "Sleeping before retry");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Determines if an error is retryable.
///
/// Returns `true` for transient failures: HTTP timeouts, connection failures,
/// server errors, store errors, and payment failures or timeouts.
///
/// Returns `false` for validation errors, version conflicts (the caller must
/// reload), busy settlements and reconciliation errors (money already moved).
///
/// # Examples
///
/// ```
/// use mealsub_engine::{EngineError, reliability::is_retryable};
///
/// let error = EngineError::InvalidSelection("time slot is required".to_string());
/// assert!(!is_retryable(&error));
///
/// let error = EngineError::StoreError("connection reset".to_string());
/// assert!(is_retryable(&error));
/// ```
#[must_use]
#[allow(clippy::match_same_arms, reason = "separate arms for clarity")]
pub fn is_retryable(error: &EngineError) -> bool {
    match error {
        EngineError::HttpError(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        EngineError::StoreError(_) => true,
        EngineError::PaymentFailed { .. } | EngineError::PaymentTimedOut { .. } => true,
        EngineError::InvalidPlanId(_)
        | EngineError::InvalidSubscriptionId(_)
        | EngineError::InvalidUserId(_)
        | EngineError::InvalidAddressId(_)
        | EngineError::InvalidSelection(_)
        | EngineError::InvalidPersonCount { .. }
        | EngineError::InvalidDate(_)
        | EngineError::AddressNotFound(_)
        | EngineError::PlanNotFound { .. }
        | EngineError::SubscriptionNotFound(_) => false,
        EngineError::VersionConflict { .. } | EngineError::SettlementInProgress(_) => false,
        EngineError::ConfigError(_) => false,
        // Never retry once a captured payment is involved
        EngineError::ReconciliationRequired { .. } => false,
    }
}
