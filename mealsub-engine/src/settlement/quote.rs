//! Selections, charge decisions and quotes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::subscriptions::{
    Action, AddressId, ChangeType, DietaryPreference, Money, Plan, PlanType, ProrationResult,
    ResolvedStatus, Subscription, UserId,
};

/// A customer's plan choice plus delivery details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSelection {
    /// Customer making the choice.
    pub user_id: UserId,
    /// Chosen diet.
    pub dietary_preference: DietaryPreference,
    /// Chosen tier.
    pub plan_type: PlanType,
    /// People to serve.
    pub person_count: u8,
    /// First delivery day (resume day for MODIFY).
    pub start_date: NaiveDate,
    /// Delivery address.
    pub delivery_address_id: AddressId,
    /// Delivery slot.
    pub time_slot: String,
}

/// What the customer owes or is owed for a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum ChargeDecision {
    /// Capture this amount.
    Charge(Money),
    /// Capture nothing; credit this amount to the wallet.
    WalletCredit(Money),
    /// Nothing owed either way.
    Free,
    /// Proration could not run; capture the selected plan's price for
    /// every person.
    FullPriceFallback(Money),
}

impl ChargeDecision {
    /// Maps a proration result to a charge.
    ///
    /// `full_price` (plan price times person count) is charged when the
    /// result is `invalid_plan_data`.
    #[must_use]
    pub const fn from_proration(result: &ProrationResult, full_price: Money) -> Self {
        match result.change_type {
            ChangeType::PriceUp => Self::Charge(result.magnitude),
            ChangeType::PriceDown => Self::WalletCredit(result.magnitude),
            ChangeType::NoChange => Self::Free,
            ChangeType::InvalidPlanData => Self::FullPriceFallback(full_price),
        }
    }

    /// Amount to capture from the customer.
    #[must_use]
    pub const fn amount(&self) -> Money {
        match *self {
            Self::Charge(amount) | Self::FullPriceFallback(amount) => amount,
            Self::WalletCredit(_) | Self::Free => Money::ZERO,
        }
    }

    /// Amount to credit to the wallet, if any.
    #[must_use]
    pub const fn wallet_credit(&self) -> Option<Money> {
        match *self {
            Self::WalletCredit(amount) if amount.is_positive() => Some(amount),
            _ => None,
        }
    }

    /// Returns `true` for the full-price fallback.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::FullPriceFallback(_))
    }
}

/// Priced decision for a selection, computed without side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Classified action.
    pub action: Action,
    /// Record the action applies to (none for a fresh purchase).
    pub previous: Option<Subscription>,
    /// Resolved status of `previous`.
    pub previous_status: Option<ResolvedStatus>,
    /// Catalog plan for the selection.
    pub plan: Plan,
    /// Proration result for UPGRADE and RENEW.
    pub proration: Option<ProrationResult>,
    /// Resulting charge.
    pub charge: ChargeDecision,
}
