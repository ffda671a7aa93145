//! Meal subscription lifecycle classifier and proration engine.
//!
//! Given a customer's subscriptions and a newly chosen diet and plan, the
//! engine decides whether the change is a modification, an upgrade, a
//! renewal or a first purchase, prices it by prorating the unused value of
//! the current plan, and settles it: payment capture or wallet credit first,
//! then the store write.
//!
//! # Architecture
//!
//! ```text
//!  PlanSelection
//!       │
//!       ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │    Status    │──►│    Action    │──►│  Proration   │   pure, `now` passed in
//! │   Resolver   │   │  Classifier  │   │  Calculator  │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │ ChargeDecision
//!                                              ▼
//!                                  ┌────────────────────────┐
//!                                  │ SettlementCoordinator  │
//!                                  └──┬──────────┬───────┬──┘
//!                                     │          │       │
//!                          PaymentGateway  SubscriptionStore  PlanCatalog / AddressBook
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use mealsub_engine::subscriptions::{
//!     Action, AddressId, DietaryPreference, Money, PlanType, Subscription, SubscriptionId,
//!     SubscriptionStatus, UserId, classify,
//! };
//!
//! # fn example() -> mealsub_engine::Result<()> {
//! let now = Utc.with_ymd_and_hms(2025, 4, 11, 9, 0, 0).unwrap();
//! let current = Subscription {
//!     id: SubscriptionId::new("sub-1")?,
//!     user_id: UserId::new("user-1")?,
//!     plan_type: PlanType::Basic,
//!     dietary_preference: DietaryPreference::Veg,
//!     price: Some(Money::from_minor(2500)),
//!     person_count: 1,
//!     meals_per_month: 30,
//!     start_date: (now - Duration::days(10)).date_naive(),
//!     end_date: None,
//!     status: SubscriptionStatus::Active,
//!     delivery_address_id: AddressId::new("addr-1")?,
//!     time_slot: "lunch".to_string(),
//!     wallet_credit_applied: None,
//!     extra_charge_applied: None,
//!     version: 1,
//! };
//!
//! let subs = [current];
//! let decision = classify(&subs, DietaryPreference::Veg, PlanType::Premium, now);
//! assert_eq!(decision.action(), Action::Upgrade);
//! # Ok(())
//! # }
//! ```
//!
//! Settling goes through [`settlement::SettlementCoordinator`], which needs a
//! [`backend::SubscriptionStore`], a [`backend::PlanCatalog`], a
//! [`backend::AddressBook`] and a [`payment::PaymentGateway`].
//!
//! # Modules
//!
//! - [`subscriptions`]: models, status resolution, classification, proration
//! - [`settlement`]: coordinator, typestate lifecycle, per-user locks
//! - [`payment`]: capture boundary and the callback bridge
//! - [`backend`]: collaborator traits with in-memory and HTTP implementations
//! - [`config`]: TOML configuration
//! - [`audit`]: audit trail on the `audit` tracing target
//! - [`reliability`]: retry with exponential backoff
//! - [`error`]: error types

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from reqwest and tokio"
)]

pub mod audit;
pub mod backend;
pub mod config;
pub mod error;
pub mod payment;
pub mod reliability;
pub mod settlement;
pub mod subscriptions;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use settlement::{PlanSelection, SettlementCoordinator, SettlementOutcome};
