//! Settlement lifecycle using the typestate pattern.
//!
//! Makes invalid state transitions compile-time errors: a settlement cannot
//! be committed before it is settled, and only a settlement that owes money
//! can wait for a payment.
//!
//! ```text
//! Idle ──► AwaitingPayment ──► Settled ──► Committed     (UPGRADE / RENEW / NONE)
//!   │                  │
//!   │                  └──► Cancelled | Failed
//!   └────────────────────► Committed                      (MODIFY)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::quote::ChargeDecision;
use crate::{
    payment::PaymentProof,
    subscriptions::{Action, Money, Subscription, UserId},
};

mod private {
    pub trait Sealed {}
}

/// Marker trait for settlement states.
pub trait Phase: private::Sealed {
    /// Runtime equivalent of the marker.
    const STATE: SettlementState;
}

/// Not started.
#[derive(Debug, Clone, Copy)]
pub struct Idle;

/// Waiting for the payment provider.
#[derive(Debug, Clone, Copy)]
pub struct AwaitingPayment;

/// Money captured, or nothing owed.
#[derive(Debug, Clone, Copy)]
pub struct Settled;

/// Store acknowledged the write; holds the stored record.
#[derive(Debug, Clone)]
pub struct Committed {
    subscription: Subscription,
}

macro_rules! phase {
    ($marker:ident => $state:ident) => {
        impl private::Sealed for $marker {}
        impl Phase for $marker {
            const STATE: SettlementState = SettlementState::$state;
        }
    };
}

phase!(Idle => Idle);
phase!(AwaitingPayment => AwaitingPayment);
phase!(Settled => Settled);
phase!(Committed => Committed);

/// Runtime settlement state, for logs and outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
    /// Not started.
    Idle,
    /// Waiting for the payment provider.
    AwaitingPayment,
    /// Money captured, or nothing owed.
    Settled,
    /// Store acknowledged the write.
    Committed,
    /// Customer dismissed the checkout.
    Cancelled,
    /// Payment or store write failed.
    Failed,
}

impl SettlementState {
    /// Returns the snake case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Settled => "settled",
            Self::Committed => "committed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for states no transition leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State-independent settlement data.
#[derive(Debug, Clone)]
pub struct SettlementData {
    /// Correlation id for logs and audit events.
    pub request_id: Uuid,
    /// Customer being settled.
    pub user_id: UserId,
    /// Classified action.
    pub action: Action,
    /// What the customer owes or is owed.
    pub charge: ChargeDecision,
    /// Proof of the captured payment, once captured.
    pub proof: Option<PaymentProof>,
}

/// Settlement with compile-time state tracking.
#[derive(Debug, Clone)]
pub struct Settlement<S> {
    data: SettlementData,
    state: S,
}

impl<S> Settlement<S> {
    fn transition<T>(self, state: T) -> Settlement<T> {
        Settlement { data: self.data, state }
    }

    /// Returns the settlement data.
    #[must_use]
    pub const fn data(&self) -> &SettlementData {
        &self.data
    }

    /// Correlation id.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        self.data.request_id
    }
}

impl<S: Phase> Settlement<S> {
    /// Runtime state.
    #[must_use]
    pub const fn state(&self) -> SettlementState {
        S::STATE
    }
}

impl Settlement<Idle> {
    /// Starts a settlement.
    #[must_use]
    pub fn new(request_id: Uuid, user_id: UserId, action: Action, charge: ChargeDecision) -> Self {
        Self {
            data: SettlementData { request_id, user_id, action, charge, proof: None },
            state: Idle,
        }
    }

    /// Moves to [`AwaitingPayment`] when money is owed; otherwise settles
    /// immediately.
    #[must_use]
    pub fn begin(self) -> FirstStep {
        let amount = self.data.charge.amount();
        if amount.is_positive() {
            FirstStep::Capture(self.transition(AwaitingPayment), amount)
        } else {
            FirstStep::NothingOwed(self.transition(Settled))
        }
    }

    /// Commits a change that needs no payment (MODIFY).
    #[must_use]
    pub fn commit_directly(self, subscription: Subscription) -> Settlement<Committed> {
        self.transition(Committed { subscription })
    }
}

/// First step of a settlement that started from [`Idle`].
#[derive(Debug)]
pub enum FirstStep {
    /// Capture this amount before committing.
    Capture(Settlement<AwaitingPayment>, Money),
    /// Nothing to capture; commit straight away.
    NothingOwed(Settlement<Settled>),
}

impl Settlement<AwaitingPayment> {
    /// Records the captured payment.
    #[must_use]
    pub fn paid(mut self, proof: PaymentProof) -> Settlement<Settled> {
        self.data.proof = Some(proof);
        self.transition(Settled)
    }

    /// Ends the settlement after the customer dismissed the checkout.
    #[must_use]
    pub fn cancel(self) -> SettlementState {
        SettlementState::Cancelled
    }

    /// Ends the settlement after the capture failed or timed out.
    #[must_use]
    pub fn fail(self) -> SettlementState {
        SettlementState::Failed
    }
}

impl Settlement<Settled> {
    /// Captured payment proof, if money was charged.
    #[must_use]
    pub const fn proof(&self) -> Option<&PaymentProof> {
        self.data.proof.as_ref()
    }

    /// Records the store acknowledgement.
    #[must_use]
    pub fn commit(self, subscription: Subscription) -> Settlement<Committed> {
        self.transition(Committed { subscription })
    }
}

impl Settlement<Committed> {
    /// Stored record.
    #[must_use]
    pub const fn subscription(&self) -> &Subscription {
        &self.state.subscription
    }

    /// Returns the settlement data and the stored record.
    #[must_use]
    pub fn into_parts(self) -> (SettlementData, Subscription) {
        (self.data, self.state.subscription)
    }
}
