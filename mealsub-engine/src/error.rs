//! Error types for the subscription engine.
//!
//! All errors implement the standard [`std::error::Error`] trait via [`thiserror::Error`].
//!
//! # Error Categories
//!
//! - **Validation Errors** ([`EngineError::InvalidSelection`], [`EngineError::InvalidDate`],
//!   [`EngineError::AddressNotFound`], ...): rejected before any settlement attempt
//! - **Payment Errors** ([`EngineError::PaymentFailed`], [`EngineError::PaymentTimedOut`]):
//!   retryable, the previous subscription is untouched
//! - **Persistence Errors** ([`EngineError::StoreError`], [`EngineError::HttpError`],
//!   [`EngineError::VersionConflict`]): the store rejected or could not apply a write
//! - **Critical** ([`EngineError::ReconciliationRequired`]): money was captured but the
//!   subscription was not updated
//!
//! A user-cancelled payment is not an error. It is reported as
//! [`SettlementOutcome::Cancelled`](crate::settlement::SettlementOutcome::Cancelled).
//!
//! # Examples
//!
//! ```
//! use mealsub_engine::error::{EngineError, Result};
//!
//! fn validate_slot(slot: &str) -> Result<&str> {
//!     if slot.trim().is_empty() {
//!         return Err(EngineError::InvalidSelection("time slot is required".to_string()));
//!     }
//!     Ok(slot)
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::payment::PaymentProof;

/// Result type alias for engine operations.
///
/// All fallible functions in this crate return this type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while classifying, pricing or settling a subscription change.
///
/// # Error Recovery
///
/// - **Validation errors**: fix the selection and retry
/// - **Payment errors** ([`PaymentFailed`](Self::PaymentFailed),
///   [`PaymentTimedOut`](Self::PaymentTimedOut)): safe to retry, nothing was persisted
/// - **Concurrency errors** ([`SettlementInProgress`](Self::SettlementInProgress),
///   [`VersionConflict`](Self::VersionConflict)): reload subscriptions and retry
/// - **Critical** ([`ReconciliationRequired`](Self::ReconciliationRequired)): do NOT retry the
///   payment; hand the proof to manual reconciliation
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum EngineError {
    /// Plan identifier failed validation.
    #[error("Invalid plan ID: {0}")]
    InvalidPlanId(String),

    /// Subscription identifier failed validation.
    #[error("Invalid subscription ID: {0}")]
    InvalidSubscriptionId(String),

    /// User identifier failed validation.
    #[error("Invalid user ID: {0}")]
    InvalidUserId(String),

    /// Address identifier failed validation.
    #[error("Invalid address ID: {0}")]
    InvalidAddressId(String),

    /// The plan selection or delivery details are incomplete or malformed.
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// Person count outside the accepted range.
    #[error("Invalid person count {count}: must be between 1 and {max}")]
    InvalidPersonCount {
        /// Requested person count.
        count: u8,
        /// Configured upper bound.
        max: u8,
    },

    /// Start or resume date is unusable (for example in the past).
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Delivery address could not be found.
    #[error("Delivery address not found: {0}")]
    AddressNotFound(String),

    /// No catalog plan matches the selected diet and plan type.
    #[error("No {plan_type} plan available for diet {diet}")]
    PlanNotFound {
        /// Selected dietary preference.
        diet: String,
        /// Selected plan type.
        plan_type: String,
    },

    /// Subscription does not exist in the store.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Payment capture reported a failure.
    ///
    /// Nothing was persisted; the caller may retry.
    #[error("Payment failed: {reason}")]
    PaymentFailed {
        /// Reason reported by the payment provider.
        reason: String,
    },

    /// Payment capture did not report an outcome in time.
    ///
    /// Treated as a failure; the caller may retry.
    #[error("Payment capture timed out after {after:?}")]
    PaymentTimedOut {
        /// Configured timeout that elapsed.
        after: Duration,
    },

    /// Another settlement for the same user is still running.
    #[error("A settlement is already in progress for user {0}")]
    SettlementInProgress(String),

    /// The stored subscription changed since it was read.
    #[error("Subscription {id} was modified concurrently (expected version {expected})")]
    VersionConflict {
        /// Subscription identifier.
        id: String,
        /// Version the caller read.
        expected: u64,
    },

    /// Subscription store rejected or failed a request.
    #[error("Subscription store error: {0}")]
    StoreError(String),

    /// HTTP request to a remote collaborator failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Configuration is malformed or out of bounds.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Payment was captured but the subscription update could not be committed.
    ///
    /// Money has moved and state has not. The proof must be handed to manual
    /// reconciliation; retrying the payment would double-charge the customer.
    #[error(
        "Payment {} captured for {reference} but the subscription was not saved: {source}",
        proof.payment_id
    )]
    ReconciliationRequired {
        /// Payment reference: the replaced subscription id, or the user id
        /// for a first purchase.
        reference: String,
        /// Settlement proof returned by the payment provider.
        proof: PaymentProof,
        /// Underlying persistence failure.
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Returns `true` for the critical post-payment persistence failure.
    #[must_use]
    pub fn requires_reconciliation(&self) -> bool {
        matches!(self, Self::ReconciliationRequired { .. })
    }

    /// Returns `true` for errors raised before any settlement attempt.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPlanId(_)
                | Self::InvalidSubscriptionId(_)
                | Self::InvalidUserId(_)
                | Self::InvalidAddressId(_)
                | Self::InvalidSelection(_)
                | Self::InvalidPersonCount { .. }
                | Self::InvalidDate(_)
                | Self::AddressNotFound(_)
                | Self::PlanNotFound { .. }
        )
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof() -> PaymentProof {
        PaymentProof {
            payment_id: "pay_123".into(),
            order_reference: "order_456".into(),
            signature: "sig".into(),
        }
    }

    #[test]
    fn test_error_display() {
        let error = EngineError::InvalidSelection("time slot is required".into());
        assert_eq!(error.to_string(), "Invalid selection: time slot is required");
    }

    #[test]
    fn test_person_count_error() {
        let error = EngineError::InvalidPersonCount { count: 11, max: 10 };
        assert_eq!(error.to_string(), "Invalid person count 11: must be between 1 and 10");
        assert!(error.is_validation());
    }

    #[test]
    fn test_reconciliation_error_keeps_proof_and_source() {
        let error = EngineError::ReconciliationRequired {
            reference: "sub-1".into(),
            proof: proof(),
            source: Box::new(EngineError::StoreError("connection reset".into())),
        };

        assert!(error.requires_reconciliation());
        assert!(!error.is_validation());
        let message = error.to_string();
        assert!(message.contains("pay_123"));
        assert!(message.contains("sub-1"));
        assert!(message.contains("connection reset"));
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_payment_errors_are_not_validation() {
        let failed = EngineError::PaymentFailed { reason: "card declined".into() };
        let timed_out = EngineError::PaymentTimedOut { after: Duration::from_secs(300) };
        assert!(!failed.is_validation());
        assert!(!timed_out.requires_reconciliation());
        assert!(timed_out.to_string().contains("300s"));
    }
}
