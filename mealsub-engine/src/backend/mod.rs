//! Collaborators behind the settlement coordinator.
//!
//! [`traits`] defines the seams; [`memory`] and [`http`] implement them.

pub mod http;
pub mod memory;
pub mod traits;

pub use http::{HttpPlanCatalog, HttpSubscriptionStore};
pub use memory::{InMemoryAddressBook, InMemoryPlanCatalog, InMemorySubscriptionStore};
pub use traits::{
    AddressBook, DeliveryAddress, ModifyRequest, NewSubscription, PlanCatalog, SubscriptionPatch,
    SubscriptionStore,
};
