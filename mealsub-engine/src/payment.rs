//! Payment capture boundary.
//!
//! A capture always ends in exactly one of three outcomes: success with a
//! settlement proof, a user cancellation, or a failure. Cancellation is a
//! normal outcome, not an error.
//!
//! Checkout widgets report through callbacks. [`payment_channel`] turns that
//! into a future: the widget receives [`PaymentCallbacks`], whose methods
//! consume `self`, so at most one callback can ever fire. Dropping the
//! callbacks without firing resolves the pending payment as a failure.
//!
//! # Examples
//!
//! ```
//! use mealsub_engine::payment::{PaymentOutcome, PaymentProof, payment_channel};
//!
//! # async fn example() {
//! let (callbacks, pending) = payment_channel();
//!
//! tokio::spawn(async move {
//!     callbacks.on_success(PaymentProof {
//!         payment_id: "pay_123".into(),
//!         order_reference: "order_456".into(),
//!         signature: "sig".into(),
//!     });
//! });
//!
//! assert!(matches!(pending.outcome().await, PaymentOutcome::Succeeded(_)));
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::subscriptions::Money;

/// Request handed to the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Amount to capture, in minor units.
    pub amount: Money,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Reference shown to the provider: the previous subscription id, or the
    /// user id for a first purchase.
    pub reference: String,
    /// Human-readable description.
    pub description: String,
}

/// Opaque identifiers proving a captured payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProof {
    /// Provider payment identifier.
    pub payment_id: String,
    /// Provider order identifier.
    pub order_reference: String,
    /// Provider signature over the payment.
    pub signature: String,
}

/// Terminal outcome of a payment capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Money was captured.
    Succeeded(PaymentProof),
    /// The customer dismissed the checkout.
    Cancelled,
    /// The provider declined or errored.
    Failed {
        /// Provider-reported reason.
        reason: String,
    },
}

/// External payment capture.
///
/// Implementations must resolve to exactly one outcome per call. Timeouts are
/// enforced by the caller.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Captures `request.amount` from the customer.
    async fn capture(&self, request: PaymentRequest) -> PaymentOutcome;
}

/// Creates a linked callback set and pending outcome.
#[must_use]
pub fn payment_channel() -> (PaymentCallbacks, PendingPayment) {
    let (tx, rx) = oneshot::channel();
    (PaymentCallbacks { tx }, PendingPayment { rx })
}

/// Single-use callbacks handed to a checkout widget.
#[derive(Debug)]
pub struct PaymentCallbacks {
    tx: oneshot::Sender<PaymentOutcome>,
}

impl PaymentCallbacks {
    /// Reports a captured payment.
    pub fn on_success(self, proof: PaymentProof) {
        self.report(PaymentOutcome::Succeeded(proof));
    }

    /// Reports that the customer dismissed the checkout.
    pub fn on_cancelled(self) {
        self.report(PaymentOutcome::Cancelled);
    }

    /// Reports a provider failure.
    pub fn on_failure(self, reason: impl Into<String>) {
        self.report(PaymentOutcome::Failed { reason: reason.into() });
    }

    fn report(self, outcome: PaymentOutcome) {
        // Receiver gone means the coordinator already timed out.
        if self.tx.send(outcome).is_err() {
            tracing::warn!("payment outcome reported after the settlement stopped waiting");
        }
    }
}

/// Outcome a checkout widget has not reported yet.
#[derive(Debug)]
pub struct PendingPayment {
    rx: oneshot::Receiver<PaymentOutcome>,
}

impl PendingPayment {
    /// Waits for the widget to report.
    pub async fn outcome(self) -> PaymentOutcome {
        self.rx.await.unwrap_or_else(|_| PaymentOutcome::Failed {
            reason: "payment widget closed without reporting an outcome".to_owned(),
        })
    }
}

/// Callback-driven checkout widget.
pub trait PaymentWidget: Send + Sync {
    /// Opens the checkout for `request`; the widget must eventually fire one callback.
    fn open(&self, request: PaymentRequest, callbacks: PaymentCallbacks);
}

/// [`PaymentGateway`] over a callback-driven [`PaymentWidget`].
#[derive(Debug)]
pub struct CallbackGateway<W> {
    widget: W,
}

impl<W> CallbackGateway<W> {
    /// Wraps a widget.
    #[must_use]
    pub const fn new(widget: W) -> Self {
        Self { widget }
    }
}

#[async_trait]
impl<W: PaymentWidget> PaymentGateway for CallbackGateway<W> {
    async fn capture(&self, request: PaymentRequest) -> PaymentOutcome {
        let (callbacks, pending) = payment_channel();
        self.widget.open(request, callbacks);
        pending.outcome().await
    }
}
