//! Audit trail for money movement.
//!
//! Every settlement step that moves or promises money emits an [`AuditEvent`]
//! on the `audit` tracing target, so finance can route these records to their
//! own sink and reconcile captured payments against subscription writes.
//!
//! # Examples
//!
//! ```
//! use mealsub_engine::audit::{AuditEvent, AuditEventType, audit_log};
//! use uuid::Uuid;
//!
//! let event = AuditEvent::new(AuditEventType::PaymentCaptured, "user-42", Uuid::new_v4())
//!     .with_subscription_id("sub-7")
//!     .with_amount(1000)
//!     .with_payment("pay_123", "order_456");
//!
//! audit_log(&event);
//! ```

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Types of auditable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Settlement began for a classified selection.
    SettlementStarted,
    /// Payment provider captured money.
    PaymentCaptured,
    /// Customer dismissed the checkout.
    PaymentCancelled,
    /// Provider declined or the capture timed out.
    PaymentFailed,
    /// A downgrade credited the customer's wallet.
    WalletCredited,
    /// Proration could not run; the selected plan's full price was charged.
    ProrationFallback,
    /// Store acknowledged the new or updated subscription.
    SubscriptionCommitted,
    /// Money was captured but the store write failed.
    ReconciliationRequired,
}

/// Details for an audit entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDetails {
    /// Subscription the event refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    /// Classified action (`MODIFY`, `UPGRADE`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Charged amount in minor units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
    /// Wallet credit in minor units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_credit_minor: Option<i64>,
    /// Provider payment identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    /// Provider order identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_reference: Option<String>,
    /// Provider signature, recorded only when reconciliation is needed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Error message (card numbers redacted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Duration of the step in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred.
    pub timestamp: SystemTime,
    /// What happened.
    pub event_type: AuditEventType,
    /// Customer the settlement belongs to (redacted).
    pub user_id: String,
    /// Correlation id shared by every event of one settlement.
    pub request_id: Uuid,
    /// Event details.
    pub details: AuditDetails,
}

#[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
impl AuditEvent {
    /// Creates a new audit event. The user id is redacted on the way in.
    #[must_use]
    pub fn new(event_type: AuditEventType, user_id: impl AsRef<str>, request_id: Uuid) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            user_id: redact_user_id(user_id.as_ref()),
            request_id,
            details: AuditDetails::default(),
        }
    }

    /// Adds the subscription id.
    #[must_use]
    pub fn with_subscription_id(mut self, id: impl Into<String>) -> Self {
        self.details.subscription_id = Some(id.into());
        self
    }

    /// Adds the classified action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.details.action = Some(action.into());
        self
    }

    /// Adds the charged amount.
    #[must_use]
    pub const fn with_amount(mut self, minor: i64) -> Self {
        self.details.amount_minor = Some(minor);
        self
    }

    /// Adds the wallet credit.
    #[must_use]
    pub const fn with_wallet_credit(mut self, minor: i64) -> Self {
        self.details.wallet_credit_minor = Some(minor);
        self
    }

    /// Adds provider identifiers of a captured payment.
    #[must_use]
    pub fn with_payment(
        mut self,
        payment_id: impl Into<String>,
        order_reference: impl Into<String>,
    ) -> Self {
        self.details.payment_id = Some(payment_id.into());
        self.details.order_reference = Some(order_reference.into());
        self
    }

    /// Adds the provider signature.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.details.signature = Some(signature.into());
        self
    }

    /// Adds an error message, redacting card numbers.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.details.error = Some(redact_card_numbers(&error.into()));
        self
    }

    /// Adds the step duration.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.details.duration_ms = Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

/// Logs an audit event on target `"audit"`.
pub fn audit_log(event: &AuditEvent) {
    tracing::info!(
        target: "audit",
        timestamp = ?event.timestamp,
        event_type = ?event.event_type,
        user_id = %event.user_id,
        request_id = %event.request_id,
        details = ?event.details,
        "AUDIT"
    );
}

/// Replaces runs of 13 to 19 digits (spaces and dashes allowed between
/// them) with `XXXX-XXXX-XXXX-XXXX`.
///
/// Payment providers sometimes echo the card number in failure reasons.
///
/// # Examples
///
/// ```
/// use mealsub_engine::audit::redact_card_numbers;
///
/// let msg = "card 4111 1111 1111 1111 declined";
/// assert_eq!(redact_card_numbers(msg), "card XXXX-XXXX-XXXX-XXXX declined");
/// assert_eq!(redact_card_numbers("order 12345"), "order 12345");
/// ```
#[must_use]
pub fn redact_card_numbers(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        // Extend over digits and single separators between digits.
        let mut end = i;
        let mut digits = 0;
        let mut j = i;
        while j < chars.len() {
            if chars[j].is_ascii_digit() {
                digits += 1;
                end = j + 1;
                j += 1;
            } else if matches!(chars[j], ' ' | '-')
                && chars.get(j + 1).is_some_and(char::is_ascii_digit)
            {
                j += 1;
            } else {
                break;
            }
        }

        if (13..=19).contains(&digits) {
            out.push_str("XXXX-XXXX-XXXX-XXXX");
        } else {
            out.extend(&chars[i..end]);
        }
        i = end;
    }

    out
}

/// Keeps the prefix up to the first `-` and the last four characters.
///
/// # Examples
///
/// ```
/// use mealsub_engine::audit::redact_user_id;
///
/// assert_eq!(redact_user_id("user-1234567890"), "user-******7890");
/// assert_eq!(redact_user_id("abc"), "abc");
/// ```
#[must_use]
pub fn redact_user_id(user_id: &str) -> String {
    let chars: Vec<char> = user_id.chars().collect();
    if chars.len() <= 4 {
        return user_id.to_owned();
    }

    let prefix_len = chars.iter().position(|&c| c == '-').map_or(0, |pos| pos + 1);
    let visible_from = chars.len() - 4;
    if prefix_len >= visible_from {
        return user_id.to_owned();
    }

    let mut out: String = chars[..prefix_len].iter().collect();
    out.push_str(&"*".repeat(visible_from - prefix_len));
    out.extend(&chars[visible_from..]);
    out
}

/// Creates and logs an audit event in one expression.
///
/// ```
/// use mealsub_engine::{audit, audit::AuditEventType};
/// use uuid::Uuid;
///
/// audit!(AuditEventType::SettlementStarted, "user-42", Uuid::new_v4(), with_action("UPGRADE"));
/// ```
#[macro_export]
macro_rules! audit {
    ($event_type:expr, $user_id:expr, $request_id:expr) => {
        $crate::audit::audit_log(&$crate::audit::AuditEvent::new($event_type, $user_id, $request_id))
    };
    ($event_type:expr, $user_id:expr, $request_id:expr, $($method:ident($($arg:expr),*)),+ $(,)?) => {
        $crate::audit::audit_log(
            &$crate::audit::AuditEvent::new($event_type, $user_id, $request_id)
                $(.$method($($arg),*))+
        )
    };
}
