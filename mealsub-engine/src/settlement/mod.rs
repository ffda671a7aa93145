//! Settlement of classified selections.
//!
//! [`SettlementCoordinator`] runs the whole flow; [`lifecycle`] tracks a
//! single settlement through its states and [`SettlementLocks`] keeps one
//! settlement per user at a time.

mod coordinator;
pub mod lifecycle;
mod lock;
mod quote;

pub use coordinator::{SettlementCoordinator, SettlementOutcome, price_selection};
pub use lifecycle::{Settlement, SettlementState};
pub use lock::{SettlementGuard, SettlementLocks};
pub use quote::{ChargeDecision, PlanSelection, Quote};
