//! Collaborator traits and their request payloads.
//!
//! The engine never talks to a database or an HTTP API directly. It goes
//! through these traits, so the same coordinator runs against the in-memory
//! backends in tests and the HTTP backends in production.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    error::{EngineError, Result},
    payment::PaymentProof,
    subscriptions::{
        AddressId, DietaryPreference, Money, Plan, PlanType, Subscription, SubscriptionId,
        SubscriptionStatus, UserId,
    },
};

/// Read access to the plan catalog.
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    /// Lists the plans offered for a diet.
    async fn list_plans(&self, diet: DietaryPreference) -> Result<Vec<Plan>>;

    /// Finds the plan of `plan_type` offered for `diet`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PlanNotFound`] when the catalog has no such plan.
    async fn find_plan(&self, diet: DietaryPreference, plan_type: PlanType) -> Result<Plan> {
        self.list_plans(diet)
            .await?
            .into_iter()
            .find(|plan| plan.plan_type == plan_type)
            .ok_or_else(|| EngineError::PlanNotFound {
                diet: diet.to_string(),
                plan_type: plan_type.to_string(),
            })
    }
}

/// Persistence for subscription records.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Lists a user's subscriptions in store order.
    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>>;

    /// Creates a subscription for a first purchase.
    async fn create_subscription(&self, payload: NewSubscription) -> Result<Subscription>;

    /// Replaces plan attributes after a settled upgrade or renewal.
    ///
    /// Implementations must reject the write with [`EngineError::VersionConflict`]
    /// when the stored version differs from `patch.expected_version`.
    async fn patch_subscription(
        &self,
        id: &SubscriptionId,
        patch: SubscriptionPatch,
    ) -> Result<Subscription>;

    /// Changes delivery details without touching price or plan identity.
    async fn modify_subscription(
        &self,
        id: &SubscriptionId,
        request: ModifyRequest,
    ) -> Result<Subscription>;

    /// Sets the stored status (operator action).
    async fn update_subscription_status(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<Subscription>;

    /// Pushes the end date out by `days` (operator action).
    async fn extend_subscription(&self, id: &SubscriptionId, days: u32) -> Result<Subscription>;
}

/// Read-only saved-address lookup.
#[async_trait]
pub trait AddressBook: Send + Sync {
    /// Returns the address, or `None` when it does not exist.
    async fn address(&self, id: &AddressId) -> Result<Option<DeliveryAddress>>;
}

/// Saved delivery address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    /// Address identifier.
    pub id: AddressId,
    /// Owning customer.
    pub user_id: UserId,
    /// Customer-chosen label ("Home", "Office").
    #[serde(default)]
    pub label: String,
}

/// Lightweight change for MODIFY.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyRequest {
    /// New start (or resume) day.
    pub resume_date: NaiveDate,
    /// New delivery slot.
    pub time_slot: String,
    /// New delivery address.
    pub delivery_address_id: AddressId,
    /// New person count.
    pub person_count: u8,
}

/// Payload for a first purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubscription {
    /// Purchasing customer.
    pub user_id: UserId,
    /// Plan tier.
    pub plan_type: PlanType,
    /// Diet.
    pub dietary_preference: DietaryPreference,
    /// Price per person per cycle.
    pub price: Money,
    /// People served.
    pub person_count: u8,
    /// Meals per cycle.
    pub meals_per_month: u32,
    /// First delivery day.
    pub start_date: NaiveDate,
    /// Delivery address.
    pub delivery_address_id: AddressId,
    /// Delivery slot.
    pub time_slot: String,
    /// Proof of the captured payment; `None` when nothing was charged.
    pub payment: Option<PaymentProof>,
}

/// Full update applied after an upgrade or renewal settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPatch {
    /// New plan tier.
    pub plan_type: PlanType,
    /// New diet.
    pub dietary_preference: DietaryPreference,
    /// New price per person per cycle.
    pub price: Money,
    /// People served.
    pub person_count: u8,
    /// Meals per cycle of the new plan.
    pub meals_per_month: u32,
    /// First delivery day of the new plan.
    pub start_date: NaiveDate,
    /// Delivery address.
    pub delivery_address_id: AddressId,
    /// Delivery slot.
    pub time_slot: String,
    /// Proof of the captured payment; `None` when nothing was charged.
    pub payment: Option<PaymentProof>,
    /// Amount credited to the customer's wallet.
    pub wallet_credit_applied: Option<Money>,
    /// Amount charged on top of the previous plan.
    pub extra_charge_applied: Option<Money>,
    /// Version of the record the settlement was computed from.
    pub expected_version: u64,
}
