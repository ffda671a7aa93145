//! Subscription data models.
//!
//! Plans, subscriptions, identifiers and money as they cross the engine boundary.

use std::{fmt, str::FromStr};

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Maximum identifier length accepted by the stores.
const MAX_ID_LEN: usize = 64;

fn validate_id(kind: &str, id: &str) -> std::result::Result<(), String> {
    if id.is_empty() {
        return Err(format!("{kind} cannot be empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(format!("{kind} must be {MAX_ID_LEN} characters or less"));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(format!(
            "{kind} can only contain alphanumeric characters, hyphens, and underscores"
        ));
    }
    Ok(())
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $variant:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier after validation.
            ///
            /// # Errors
            ///
            /// Returns error if the ID is empty, exceeds 64 characters, or contains
            /// characters other than ASCII alphanumerics, hyphens, and underscores.
            pub fn new<S: Into<String>>(id: S) -> Result<Self> {
                let id = id.into();
                validate_id($kind, &id).map_err(EngineError::$variant)?;
                Ok(Self(id))
            }

            /// Returns the inner string reference.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = EngineError;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// Catalog plan identifier.
    PlanId,
    "plan_id",
    InvalidPlanId
);

identifier!(
    /// Subscription record identifier.
    SubscriptionId,
    "subscription_id",
    InvalidSubscriptionId
);

identifier!(
    /// Customer identifier.
    UserId,
    "user_id",
    InvalidUserId
);

identifier!(
    /// Saved delivery address identifier.
    AddressId,
    "address_id",
    InvalidAddressId
);

/// Amount in minor currency units (paise, cents).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Creates an amount from minor units.
    #[must_use]
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Returns the amount in minor units.
    #[must_use]
    pub const fn minor(self) -> i64 {
        self.0
    }

    /// Returns `true` if the amount is strictly positive.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Returns the amount as a decimal for fractional arithmetic.
    #[must_use]
    pub fn to_decimal(self) -> Decimal {
        Decimal::from(self.0)
    }

    /// Multiplies by a count, returning `None` on overflow.
    #[must_use]
    pub fn checked_mul(self, count: i64) -> Option<Self> {
        self.0.checked_mul(count).map(Self)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    /// Entry tier.
    Basic,
    /// Premium tier.
    Premium,
    /// Family tier.
    Family,
}

impl PlanType {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Family => "family",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dietary preference a plan is offered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DietaryPreference {
    /// Vegetarian.
    Veg,
    /// Vegetarian with eggs.
    VegWithEgg,
    /// Non-vegetarian.
    Nonveg,
}

impl DietaryPreference {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Veg => "veg",
            Self::VegWithEgg => "veg_with_egg",
            Self::Nonveg => "nonveg",
        }
    }
}

impl fmt::Display for DietaryPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog offering for one diet and tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan identifier.
    pub id: PlanId,
    /// Plan tier.
    pub plan_type: PlanType,
    /// Diet the plan is offered for.
    pub dietary_preference: DietaryPreference,
    /// Price per person per billing cycle.
    pub price: Money,
    /// Meals per billing cycle.
    pub duration: u32,
    /// Marketing feature list, in display order.
    #[serde(default)]
    pub features: Vec<String>,
}

/// Stored lifecycle status of a subscription record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created, awaiting first settlement.
    Pending,
    /// Running.
    Active,
    /// Paid but not started yet.
    Inactive,
    /// Ran to its end date.
    Completed,
    /// Cancelled by the customer or an operator.
    Cancelled,
}

impl SubscriptionStatus {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(EngineError::InvalidSelection(format!("unknown status '{other}'"))),
        }
    }
}

/// A customer's purchased instance of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique subscription identifier.
    pub id: SubscriptionId,
    /// Owning customer.
    pub user_id: UserId,
    /// Plan tier at purchase time.
    pub plan_type: PlanType,
    /// Diet at purchase time.
    pub dietary_preference: DietaryPreference,
    /// Price per person per cycle. Missing on some legacy records.
    pub price: Option<Money>,
    /// Number of people served (1-10).
    pub person_count: u8,
    /// Meals per cycle, snapshotted from the plan at creation.
    pub meals_per_month: u32,
    /// First delivery day.
    pub start_date: NaiveDate,
    /// Last day of the cycle; derived from `meals_per_month` when absent.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Stored lifecycle status.
    pub status: SubscriptionStatus,
    /// Saved delivery address.
    pub delivery_address_id: AddressId,
    /// Delivery time slot label.
    pub time_slot: String,
    /// Wallet credit granted when this record was settled.
    #[serde(default)]
    pub wallet_credit_applied: Option<Money>,
    /// Extra charge captured when this record was settled.
    #[serde(default)]
    pub extra_charge_applied: Option<Money>,
    /// Optimistic-concurrency token, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

impl Subscription {
    /// Returns the stored end date, or `start_date + meals_per_month` days.
    #[must_use]
    pub fn effective_end_date(&self) -> NaiveDate {
        self.end_date.unwrap_or_else(|| {
            self.start_date
                .checked_add_days(Days::new(u64::from(self.meals_per_month)))
                .unwrap_or(NaiveDate::MAX)
        })
    }

    /// Returns `true` if the record carries the cancelled flag.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status == SubscriptionStatus::Cancelled
    }
}
