//! Reliability patterns for store communication.
//!
//! Provides retry logic for transient failures.

mod retry;

pub use retry::{RetryPolicy, is_retryable, retry_with_backoff};
