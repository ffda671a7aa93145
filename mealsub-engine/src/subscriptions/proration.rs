//! Proration calculation for plan changes.
//!
//! Computes the price delta between the unused value of the customer's
//! current plan and the cost basis of the newly selected plan. Arithmetic is
//! done in [`Decimal`] and rounded to the currency's minor unit only once, on
//! the final difference.
//!
//! For an active plan the consumed days of the *new* plan are priced at the
//! new plan's per-day rate, not the old one. This matches the behaviour
//! customers have been billed under and must not be changed without a
//! product decision.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

use super::{
    models::{Money, Plan, Subscription},
    status::ResolvedStatus,
};

/// Direction of the price delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Customer owes the magnitude.
    PriceUp,
    /// Customer is owed the magnitude as wallet credit.
    PriceDown,
    /// Nothing owed either way.
    NoChange,
    /// Inputs were missing or non-positive; no delta was computed.
    InvalidPlanData,
}

/// Outcome of a proration calculation. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationResult {
    /// Absolute value of the delta, in minor units.
    pub magnitude: Money,
    /// Direction of the delta.
    pub change_type: ChangeType,
    /// Whole days of the previous plan already used, when computed.
    pub units_consumed: Option<u32>,
}

impl ProrationResult {
    /// Result for unusable inputs.
    pub const INVALID: Self =
        Self { magnitude: Money::ZERO, change_type: ChangeType::InvalidPlanData, units_consumed: None };

    /// Classifies a raw difference and rounds it to minor units.
    fn from_difference(net_difference: Decimal, units_consumed: u32) -> Self {
        let rounded =
            net_difference.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let Some(magnitude) = rounded.abs().to_i64().map(Money::from_minor) else {
            return Self::INVALID;
        };

        let change_type = if magnitude == Money::ZERO {
            ChangeType::NoChange
        } else if rounded.is_sign_positive() {
            ChangeType::PriceUp
        } else {
            ChangeType::PriceDown
        };

        Self { magnitude, change_type, units_consumed: Some(units_consumed) }
    }
}

/// Snapshot of the subscription being replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviousPlan {
    /// Price per cycle; `None` when the record has no price.
    pub price: Option<Money>,
    /// People served.
    pub person_count: u8,
    /// Meals per cycle at purchase time.
    pub meals_per_month: u32,
    /// First delivery day.
    pub start_date: NaiveDate,
    /// Status resolved at the time of the change.
    pub status: ResolvedStatus,
}

impl PreviousPlan {
    /// Captures the pricing inputs of a stored subscription.
    #[must_use]
    pub fn from_subscription(subscription: &Subscription, status: ResolvedStatus) -> Self {
        Self {
            price: subscription.price,
            person_count: subscription.person_count,
            meals_per_month: subscription.meals_per_month,
            start_date: subscription.start_date,
            status,
        }
    }
}

/// Pricing inputs of the newly selected plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedPlan {
    /// Price per cycle.
    pub price: Money,
    /// Meals per cycle.
    pub duration: u32,
    /// People to serve.
    pub person_count: u8,
}

impl SelectedPlan {
    /// Captures the pricing inputs of a catalog plan for `person_count` people.
    #[must_use]
    pub fn from_plan(plan: &Plan, person_count: u8) -> Self {
        Self { price: plan.price, duration: plan.duration, person_count }
    }
}

/// Computes the price delta of switching from `previous` to `selected` at `now`.
///
/// Returns [`ChangeType::InvalidPlanData`] with a zero magnitude when the
/// previous price is missing or non-positive, the selected price is
/// non-positive, the selected duration is zero, or the previous plan is
/// neither active nor inactive.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use mealsub_engine::subscriptions::{
///     ChangeType, Money, PreviousPlan, ResolvedStatus, SelectedPlan, prorate,
/// };
///
/// let now = Utc::now();
/// let previous = PreviousPlan {
///     price: Some(Money::from_minor(2500)),
///     person_count: 1,
///     meals_per_month: 30,
///     start_date: (now - Duration::days(10)).date_naive(),
///     status: ResolvedStatus::Active,
/// };
/// let selected = SelectedPlan { price: Money::from_minor(4000), duration: 30, person_count: 1 };
///
/// let result = prorate(&previous, &selected, now);
/// assert_eq!(result.change_type, ChangeType::PriceUp);
/// assert_eq!(result.magnitude, Money::from_minor(1000));
/// assert_eq!(result.units_consumed, Some(10));
/// ```
#[must_use]
pub fn prorate(
    previous: &PreviousPlan,
    selected: &SelectedPlan,
    now: DateTime<Utc>,
) -> ProrationResult {
    let Some(previous_price) = previous.price.filter(|price| price.is_positive()) else {
        return ProrationResult::INVALID;
    };
    if !selected.price.is_positive() || selected.duration == 0 {
        return ProrationResult::INVALID;
    }

    match previous.status {
        ResolvedStatus::Inactive => prorate_not_started(previous_price, selected),
        ResolvedStatus::Active => prorate_running(previous, previous_price, selected, now),
        ResolvedStatus::Completed | ResolvedStatus::Cancelled => ProrationResult::INVALID,
    }
}

/// Previous plan has not delivered anything yet: plain price difference.
fn prorate_not_started(previous_price: Money, selected: &SelectedPlan) -> ProrationResult {
    let net_difference = selected.price.to_decimal() - previous_price.to_decimal();
    ProrationResult::from_difference(net_difference, 0)
}

/// Previous plan is mid-cycle: credit its unused value against the new plan's
/// price for the same elapsed days.
fn prorate_running(
    previous: &PreviousPlan,
    previous_price: Money,
    selected: &SelectedPlan,
    now: DateTime<Utc>,
) -> ProrationResult {
    let units_consumed = days_consumed(previous.start_date, now);

    match running_difference(previous, previous_price, selected, Decimal::from(units_consumed)) {
        Some(net_difference) => ProrationResult::from_difference(net_difference, units_consumed),
        None => ProrationResult::INVALID,
    }
}

/// `None` on overflow or a zero `meals_per_month`.
fn running_difference(
    previous: &PreviousPlan,
    previous_price: Money,
    selected: &SelectedPlan,
    units: Decimal,
) -> Option<Decimal> {
    let old_price = previous_price.to_decimal();
    let cost_per_unit_old = old_price
        .checked_mul(Decimal::from(previous.person_count))?
        .checked_div(Decimal::from(previous.meals_per_month))?;
    let consumed_value = cost_per_unit_old.checked_mul(units)?;
    let remaining_value = old_price.checked_sub(consumed_value)?;

    let new_price = selected.price.to_decimal();
    let cost_per_unit_new = new_price
        .checked_mul(Decimal::from(selected.person_count))?
        .checked_div(Decimal::from(selected.duration))?;
    let new_plan_actual_price = new_price.checked_sub(cost_per_unit_new.checked_mul(units)?)?;

    new_plan_actual_price.checked_sub(remaining_value)
}

/// Whole days elapsed since `start_date`, never negative.
fn days_consumed(start_date: NaiveDate, now: DateTime<Utc>) -> u32 {
    let elapsed = (now.date_naive() - start_date).num_days().max(0);
    u32::try_from(elapsed).unwrap_or(u32::MAX)
}
