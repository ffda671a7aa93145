//! Subscription domain: models, status resolution, classification and proration.
//!
//! Everything in this module is pure. Functions take `now` explicitly and
//! never read ambient state, so the same inputs always yield the same result.

pub mod classifier;
pub mod models;
pub mod proration;
pub mod status;


pub use classifier::{Action, Classification, classify};
pub use models::{
    AddressId, DietaryPreference, Money, Plan, PlanId, PlanType, Subscription, SubscriptionId,
    SubscriptionStatus, UserId,
};
pub use proration::{ChangeType, PreviousPlan, ProrationResult, SelectedPlan, prorate};
pub use status::{ResolvedStatus, resolve_dates, resolve_status};
